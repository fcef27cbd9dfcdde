#![allow(dead_code, unused_imports)]
//! Tests against a connected adapter. The bus needs at least one other node acknowledging frames.
use std::time::Duration;

use futures::StreamExt;
use udt1cri::can::{AsyncCanAdapter, Frame};
use udt1cri::udt1cri::{Config, Udt1cri};

static BULK_NUM_FRAMES_ASYNC: u64 = 0x1000;
static BULK_ASYNC_TIMEOUT_MS: u64 = 5000;
static ECHO_TIMEOUT_MS: u64 = 1000;

fn config() -> Config {
    Config {
        bitrate: Some(500_000),
        ..Default::default()
    }
}

/// Sends a large number of frames to the adapter, and awaits them simultaneously.
/// This keeps the transmit pool saturated, so most sends have to wait for a free context.
async fn bulk_send(adapter: &AsyncCanAdapter) {
    let mut frames = vec![];

    for i in 0..BULK_NUM_FRAMES_ASYNC {
        frames.push(Frame::new(0, 0x123.into(), &i.to_be_bytes()).unwrap());
    }

    let r = frames.iter().map(|frame| adapter.send(frame));
    let results = tokio::time::timeout(
        Duration::from_millis(BULK_ASYNC_TIMEOUT_MS),
        futures::future::join_all(r),
    )
    .await
    .unwrap();

    assert!(results.iter().all(|r| r.is_ok()));
}

/// Sent frames come back as loopback frames, in the order they were sent.
async fn echo_in_order(adapter: &AsyncCanAdapter) {
    let frames: Vec<Frame> = (0..0x20u8)
        .map(|i| Frame::new(0, 0x456.into(), &[i]).unwrap())
        .collect();

    let echoes = adapter.recv_filter(|frame| frame.loopback);
    futures::pin_mut!(echoes);

    for frame in &frames {
        adapter.send(frame).await.unwrap();
    }

    for frame in &frames {
        let mut echo = tokio::time::timeout(Duration::from_millis(ECHO_TIMEOUT_MS), echoes.next())
            .await
            .unwrap()
            .unwrap();
        echo.loopback = false;
        assert_eq!(&echo, frame);
    }
}

#[cfg(feature = "test-udt1cri")]
#[tokio::test]
#[serial_test::serial]
async fn udt1cri_bulk_send_async() {
    let adapter = Udt1cri::new_async(config()).unwrap();
    bulk_send(&adapter).await;
}

#[cfg(feature = "test-udt1cri")]
#[tokio::test]
#[serial_test::serial]
async fn udt1cri_echo_in_order() {
    let adapter = Udt1cri::new_async(config()).unwrap();
    echo_in_order(&adapter).await;
}

#[cfg(feature = "test-udt1cri")]
#[tokio::test]
#[serial_test::serial]
async fn udt1cri_unsupported_bitrate() {
    let config = Config {
        bitrate: Some(123_456),
        ..Default::default()
    };

    match Udt1cri::new_async(config) {
        Err(udt1cri::Error::UnsupportedBitrate(e)) => assert_eq!(e.requested, 123_456),
        Err(e) => panic!("Expected UnsupportedBitrate, got {:?}", e),
        Ok(_) => panic!("Expected UnsupportedBitrate error"),
    }
}
