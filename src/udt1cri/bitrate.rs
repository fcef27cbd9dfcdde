//! Bitrates supported by the adapter firmware.
//!
//! The device does not accept arbitrary bit timing. It only knows the rates in
//! [`BITRATE_TABLE`], selected by a rate code (the rate in kbit/s). The timing values in the
//! table describe what the firmware does and are kept for presentation.

use thiserror::Error;

const CAN_SYNC_SEG: u32 = 1;

/// One row of the firmware rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitrateEntry {
    /// Requested bitrate in bits per second. Lookup key.
    pub nominal_bitrate_bps: u32,
    pub sample_point_permille: u32,
    pub time_quantum_ns: u32,
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
    pub bit_rate_prescaler: u32,
    /// Rate code sent in the change bitrate command.
    pub device_rate_code: u16,
}

impl BitrateEntry {
    /// Duration of one bit in time quanta, including the synchronization segment.
    pub fn bit_time_tq(&self) -> u32 {
        CAN_SYNC_SEG + self.prop_seg + self.phase_seg1 + self.phase_seg2
    }

    /// Bitrate resulting from the timing values. Can differ slightly from the nominal rate.
    pub fn effective_bitrate(&self) -> u32 {
        1_000_000_000 / (self.bit_time_tq() * self.time_quantum_ns)
    }

    /// Sample point in normalized form (`0.0..1.0`).
    pub fn sample_point(&self) -> f64 {
        self.sample_point_permille as f64 / 1000.0
    }
}

/// Returned by [`resolve`] when the firmware has no entry for the requested bitrate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unsupported bitrate ({requested}). Use one of: {}", supported_list())]
pub struct UnsupportedBitrate {
    pub requested: u32,
}

impl UnsupportedBitrate {
    /// All accepted bitrates in bits per second.
    pub fn supported(&self) -> impl Iterator<Item = u32> {
        BITRATE_TABLE.iter().map(|e| e.nominal_bitrate_bps)
    }
}

fn supported_list() -> String {
    BITRATE_TABLE
        .iter()
        .map(|e| e.nominal_bitrate_bps.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Exact match lookup, there is no nearest neighbour fallback.
pub fn resolve(requested_bps: u32) -> Result<&'static BitrateEntry, UnsupportedBitrate> {
    BITRATE_TABLE
        .iter()
        .find(|e| e.nominal_bitrate_bps == requested_bps)
        .ok_or(UnsupportedBitrate {
            requested: requested_bps,
        })
}

#[allow(clippy::too_many_arguments)]
const fn entry(
    nominal_bitrate_bps: u32,
    sample_point_permille: u32,
    time_quantum_ns: u32,
    prop_seg: u32,
    phase_seg1: u32,
    phase_seg2: u32,
    bit_rate_prescaler: u32,
    device_rate_code: u16,
) -> BitrateEntry {
    BitrateEntry {
        nominal_bitrate_bps,
        sample_point_permille,
        time_quantum_ns,
        prop_seg,
        phase_seg1,
        phase_seg2,
        sjw: 1,
        bit_rate_prescaler,
        device_rate_code,
    }
}

/// Values hardcoded in the device firmware.
#[rustfmt::skip]
pub static BITRATE_TABLE: [BitrateEntry; 18] = [
    //    bitrate  sp    tq    prop ps1 ps2 brp  kbps
    entry(20_000,    700, 2500, 5, 8, 6, 100, 20),
    entry(33_333,    680, 1200, 8, 8, 8, 48,  33),
    entry(50_000,    800, 1000, 8, 7, 4, 40,  50),
    entry(80_000,    680, 500,  8, 8, 8, 20,  80),
    entry(83_333,    708, 500,  8, 8, 7, 20,  83),
    entry(100_000,   700, 1000, 1, 5, 3, 40,  100),
    entry(125_000,   600, 400,  3, 8, 8, 16,  125),
    entry(150_000,   789, 350,  8, 6, 4, 14,  150),
    entry(175_000,   789, 300,  8, 6, 4, 12,  175),
    entry(200_000,   680, 200,  8, 8, 8, 8,   200),
    entry(225_000,   772, 200,  8, 8, 5, 8,   225),
    entry(250_000,   600, 200,  3, 8, 8, 8,   250),
    entry(275_000,   708, 150,  8, 8, 7, 6,   275),
    entry(300_000,   772, 150,  8, 8, 5, 6,   300),
    entry(500_000,   600, 100,  3, 8, 8, 4,   500),
    entry(625_000,   750, 200,  1, 4, 2, 8,   625),
    entry(800_000,   680, 50,   8, 8, 8, 2,   800),
    entry(1_000_000, 600, 50,   3, 8, 8, 2,   1000),
];
