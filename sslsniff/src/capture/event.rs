//! Decoded capture record
//!
//! Records arrive as raw bytes in the [`DataEvent`] layout. Decoding copies the
//! header fields out at their fixed offsets and keeps only the captured prefix
//! of the payload, so nothing borrows from the ring buffer once the handler runs.

use std::mem::offset_of;

use sslsniff_common::{
    DataEvent, Direction, COMM_LEN, DATA_OFFSET, FD_UNKNOWN, MAX_CAPTURE_BYTES, RECORD_SIZE,
};

use crate::domain::types::op_name;
use crate::domain::DecodeError;

/// One captured TLS transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    /// Command name of the calling task
    pub comm: String,
    pub pid: u32,
    pub tid: u32,
    /// Monotonic nanoseconds at the call's return
    pub timestamp_ns: u64,
    /// Time spent inside the library call
    pub latency_ns: u64,
    pub direction: Direction,
    /// Socket fd bound to the session, when the library exposes it
    pub fd: Option<i32>,
    /// Bytes actually transferred by the call
    pub len: u32,
    /// Captured prefix of the transferred bytes
    pub data: Vec<u8>,
}

impl CapturedEvent {
    /// Decode one ring buffer record
    ///
    /// # Errors
    /// Returns an error if the record is shorter than its header or its payload,
    /// carries an unknown direction, or claims more data than was transferred
    pub fn decode(record: &[u8]) -> Result<Self, DecodeError> {
        if record.len() < DATA_OFFSET {
            return Err(DecodeError::Truncated { len: record.len(), min: DATA_OFFSET });
        }

        let direction_byte = record[offset_of!(DataEvent, direction)];
        let direction =
            Direction::from_u8(direction_byte).ok_or(DecodeError::Direction(direction_byte))?;

        let len = read_u32(record, offset_of!(DataEvent, len));
        let captured = read_u32(record, offset_of!(DataEvent, captured_len));
        let limit = (len as usize).min(MAX_CAPTURE_BYTES);
        if captured as usize > limit {
            return Err(DecodeError::CapturedLength { captured, limit });
        }
        let data_end = DATA_OFFSET + captured as usize;
        if record.len() < data_end {
            return Err(DecodeError::Truncated { len: record.len(), min: data_end });
        }

        let comm_bytes = &record[..COMM_LEN];
        let comm_end = comm_bytes.iter().position(|&b| b == 0).unwrap_or(COMM_LEN);
        let fd = read_i32(record, offset_of!(DataEvent, fd));

        Ok(Self {
            comm: String::from_utf8_lossy(&comm_bytes[..comm_end]).into_owned(),
            pid: read_u32(record, offset_of!(DataEvent, pid)),
            tid: read_u32(record, offset_of!(DataEvent, tid)),
            timestamp_ns: read_u64(record, offset_of!(DataEvent, timestamp_ns)),
            latency_ns: read_u64(record, offset_of!(DataEvent, latency_ns)),
            direction,
            fd: (fd != FD_UNKNOWN).then_some(fd),
            len,
            data: record[DATA_OFFSET..data_end].to_vec(),
        })
    }

    /// Encode into the wire layout, padded to a full record
    ///
    /// Used by in-process producers that feed the consumer loop without a kernel.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_record(&self) -> Vec<u8> {
        let mut record = vec![0u8; RECORD_SIZE];
        let comm = self.comm.as_bytes();
        let comm_len = comm.len().min(COMM_LEN - 1);
        record[..comm_len].copy_from_slice(&comm[..comm_len]);

        let captured = self.data.len().min(MAX_CAPTURE_BYTES);
        write_bytes(&mut record, offset_of!(DataEvent, pid), &self.pid.to_ne_bytes());
        write_bytes(&mut record, offset_of!(DataEvent, tid), &self.tid.to_ne_bytes());
        write_bytes(&mut record, offset_of!(DataEvent, timestamp_ns), &self.timestamp_ns.to_ne_bytes());
        write_bytes(&mut record, offset_of!(DataEvent, latency_ns), &self.latency_ns.to_ne_bytes());
        record[offset_of!(DataEvent, direction)] = self.direction as u8;
        write_bytes(
            &mut record,
            offset_of!(DataEvent, fd),
            &self.fd.unwrap_or(FD_UNKNOWN).to_ne_bytes(),
        );
        write_bytes(&mut record, offset_of!(DataEvent, len), &self.len.to_ne_bytes());
        write_bytes(&mut record, offset_of!(DataEvent, captured_len), &(captured as u32).to_ne_bytes());
        record[DATA_OFFSET..DATA_OFFSET + captured].copy_from_slice(&self.data[..captured]);
        record
    }

    /// Fewer bytes captured than the call transferred
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.len as usize
    }

    #[must_use]
    pub fn op_name(&self) -> &'static str {
        op_name(self.direction)
    }
}

fn read_u32(record: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&record[offset..offset + 4]);
    u32::from_ne_bytes(bytes)
}

fn read_i32(record: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&record[offset..offset + 4]);
    i32::from_ne_bytes(bytes)
}

fn read_u64(record: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&record[offset..offset + 8]);
    u64::from_ne_bytes(bytes)
}

fn write_bytes(record: &mut [u8], offset: usize, bytes: &[u8]) {
    record[offset..offset + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> CapturedEvent {
        CapturedEvent {
            comm: "curl".to_string(),
            pid: 4242,
            tid: 4243,
            timestamp_ns: 1_000_000,
            latency_ns: 350,
            direction: Direction::Write,
            fd: Some(5),
            len: 4,
            data: b"PING".to_vec(),
        }
    }

    #[test]
    fn test_decode_reads_header_fields() {
        let event = CapturedEvent::decode(&ping().to_record()).unwrap();
        assert_eq!(event, ping());
        assert_eq!(event.op_name(), "SSL_OP_WRITE");
        assert!(!event.is_truncated());
    }

    #[test]
    fn test_decode_accepts_record_cut_after_payload() {
        let record = ping().to_record();
        let event = CapturedEvent::decode(&record[..DATA_OFFSET + 4]).unwrap();
        assert_eq!(event.data, b"PING");
    }

    #[test]
    fn test_unknown_fd() {
        let mut source = ping();
        source.fd = None;
        let record = source.to_record();
        assert_eq!(read_i32(&record, offset_of!(DataEvent, fd)), FD_UNKNOWN);
        assert_eq!(CapturedEvent::decode(&record).unwrap().fd, None);
    }

    #[test]
    fn test_short_header_is_rejected() {
        let err = CapturedEvent::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { len: 10, min: DATA_OFFSET });
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let record = ping().to_record();
        let err = CapturedEvent::decode(&record[..DATA_OFFSET + 2]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { len: DATA_OFFSET + 2, min: DATA_OFFSET + 4 });
    }

    #[test]
    fn test_bad_direction_is_rejected() {
        let mut record = ping().to_record();
        record[offset_of!(DataEvent, direction)] = 9;
        assert_eq!(CapturedEvent::decode(&record).unwrap_err(), DecodeError::Direction(9));
    }

    #[test]
    fn test_captured_beyond_len_is_rejected() {
        let mut record = ping().to_record();
        write_bytes(&mut record, offset_of!(DataEvent, len), &2u32.to_ne_bytes());
        assert_eq!(
            CapturedEvent::decode(&record).unwrap_err(),
            DecodeError::CapturedLength { captured: 4, limit: 2 }
        );
    }

    #[test]
    fn test_truncated_capture() {
        let event = CapturedEvent {
            len: 10_000,
            data: vec![b'x'; MAX_CAPTURE_BYTES],
            direction: Direction::Read,
            ..ping()
        };
        let decoded = CapturedEvent::decode(&event.to_record()).unwrap();
        assert_eq!(decoded.len, 10_000);
        assert_eq!(decoded.data.len(), MAX_CAPTURE_BYTES);
        assert!(decoded.is_truncated());
        assert_eq!(decoded.op_name(), "SSL_OP_READ");
    }

    #[test]
    fn test_long_comm_is_cut_to_kernel_width() {
        let event = CapturedEvent { comm: "a-very-long-process-name".to_string(), ..ping() };
        let decoded = CapturedEvent::decode(&event.to_record()).unwrap();
        assert_eq!(decoded.comm, "a-very-long-pro");
    }
}
