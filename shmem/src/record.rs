//! The tick record shared by every producer and consumer of a market queue.
//!
//! Field offsets are fixed: `colo` at 0, `tick` at 16, `update_time` at 20
//! and `data` at 52, for 4148 bytes in total. There is no version field, so
//! a layout change needs a new queue key.

use std::fmt;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

pub const COLO_LEN: usize = 16;
pub const UPDATE_TIME_LEN: usize = 32;
pub const PAYLOAD_LEN: usize = 4096;
pub const MARKET_DATA_SIZE: usize = COLO_LEN + size_of::<i32>() + UPDATE_TIME_LEN + PAYLOAD_LEN;

#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MarketData {
    /// Origin or venue tag. Not necessarily NUL terminated.
    pub colo: [u8; COLO_LEN],
    pub tick: i32,
    pub update_time: [u8; UPDATE_TIME_LEN],
    pub data: [u8; PAYLOAD_LEN],
}

const _: () = assert!(size_of::<MarketData>() == MARKET_DATA_SIZE);

impl MarketData {
    /// Builds a record, truncating each text or payload to its field width.
    pub fn new(colo: &str, tick: i32, update_time: &str, data: &[u8]) -> MarketData {
        let mut record = MarketData::zeroed();
        copy_truncated(&mut record.colo, colo.as_bytes());
        record.tick = tick;
        copy_truncated(&mut record.update_time, update_time.as_bytes());
        copy_truncated(&mut record.data, data);
        record
    }

    pub fn colo_str(&self) -> String {
        c_str_lossy(&self.colo)
    }

    pub fn update_time_str(&self) -> String {
        c_str_lossy(&self.update_time)
    }
}

impl Default for MarketData {
    fn default() -> Self {
        MarketData::zeroed()
    }
}

impl fmt::Debug for MarketData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketData")
            .field("colo", &self.colo_str())
            .field("tick", &self.tick)
            .field("update_time", &self.update_time_str())
            .field("data_len", &PAYLOAD_LEN)
            .finish()
    }
}

#[inline]
fn copy_truncated(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
}

fn c_str_lossy(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use super::*;

    #[test]
    fn offsets_are_stable() {
        assert_eq!(offset_of!(MarketData, colo), 0);
        assert_eq!(offset_of!(MarketData, tick), 16);
        assert_eq!(offset_of!(MarketData, update_time), 20);
        assert_eq!(offset_of!(MarketData, data), 52);
        assert_eq!(size_of::<MarketData>(), 4148);
    }

    #[test]
    fn new_truncates_long_fields() {
        let record = MarketData::new("SHFE-COLO-0123456789", 7, "09:30:00.000", b"abc");
        assert_eq!(&record.colo, b"SHFE-COLO-012345");
        assert_eq!(record.colo_str(), "SHFE-COLO-012345");
        assert_eq!(record.tick, 7);
        assert_eq!(record.update_time_str(), "09:30:00.000");
        assert_eq!(&record.data[..4], b"abc\0");
    }

    #[test]
    fn bytes_view_covers_whole_record() {
        let record = MarketData::new("CFFEX", -1, "", &[0xAB; PAYLOAD_LEN]);
        let bytes = bytemuck::bytes_of(&record);
        assert_eq!(bytes.len(), MARKET_DATA_SIZE);
        assert_eq!(&bytes[16..20], &(-1i32).to_ne_bytes());
        assert!(bytes[52..].iter().all(|&b| b == 0xAB));
    }
}
