// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Variable-size sensor-status frame codec.
//!
//! Status frames are a 20-byte header, `declared_payload_size` payload bytes
//! (observed: 38,400; the field is carried verbatim), then a 12-byte footer
//! `DNEB | checksum | KCLB`. Header fields (u32 LE): start marker, frame
//! number, declared payload size, sensor count (== 64), effective
//! status-bytes size (== 600).
//!
//! Only the first 600 payload bytes carry status; the remainder is ignored:
//!
//! ```text
//! [0, 300)    ASCII/UTF-8 name and label text (decoded lossily)
//! [300, 600)  64 records x 4 bytes: {ACT, LLS, SLS, FLS}
//! ```
//!
//! Partial records at the tail are dropped without failing the frame.

use super::{
    marker_at, read_u32_le, DecodeError, DecodeErrorKind, EndMarker, HeaderField,
};
use crate::config::{
    FOOTER_SIZE, FRAME_MARKER, HEADER_SIZE, PAYLOAD_END_MARKER, SENSOR_COUNT,
    STATUS_BYTES_SIZE, STATUS_RECORD_SIZE, STATUS_TEXT_SIZE,
};

// ============================================================================
// Decoded status
// ============================================================================

/// Per-sensor status flags, in wire order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorFlags {
    /// Active flag.
    pub act: u8,
    /// Laser-lock status.
    pub lls: u8,
    /// Signal-lock status.
    pub sls: u8,
    /// Field-lock status.
    pub fls: u8,
}

/// One decoded sensor-status frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorStatus {
    /// Frame counter from the wire header.
    pub frame_number: u32,

    /// Header field 3, carried verbatim (observed: 38,400).
    pub declared_payload_size: u32,

    /// Header field 4; always 64 on a decoded frame.
    pub sensor_count: u32,

    /// Header field 5; always 600 on a decoded frame.
    pub status_size: u32,

    /// Name/label text region, decoded lossily.
    pub labels: String,

    /// Sensor records in index order; exactly 64 when the payload carries
    /// the full status region.
    pub sensors: Vec<SensorFlags>,

    /// Wall-clock seconds at parse time, assigned by the session.
    pub timestamp: f64,
}

/// Total wire size of a status frame declaring `declared_payload_size`.
pub fn frame_size(declared_payload_size: u32) -> usize {
    HEADER_SIZE + declared_payload_size as usize + FOOTER_SIZE
}

// ============================================================================
// Decode / encode
// ============================================================================

/// Decode one status frame from `buf` at `offset`. Pure; no cursor movement.
pub fn decode(buf: &[u8], offset: usize) -> Result<SensorStatus, DecodeError> {
    if buf.len() < offset + HEADER_SIZE {
        return Err(DecodeError::new(DecodeErrorKind::ShortBuffer, offset));
    }
    if !marker_at(buf, offset, &FRAME_MARKER) {
        return Err(DecodeError::new(DecodeErrorKind::BadStartMarker, offset));
    }

    let frame_number = read_u32_le(buf, offset + 4);
    let declared_payload_size = read_u32_le(buf, offset + 8);
    let sensor_count = read_u32_le(buf, offset + 12);
    let status_size = read_u32_le(buf, offset + 16);

    if sensor_count != SENSOR_COUNT {
        return Err(DecodeError::new(
            DecodeErrorKind::BadHeaderValue(HeaderField::SensorCount),
            offset,
        ));
    }
    if status_size as usize != STATUS_BYTES_SIZE {
        return Err(DecodeError::new(
            DecodeErrorKind::BadHeaderValue(HeaderField::StatusSize),
            offset,
        ));
    }

    let total = frame_size(declared_payload_size);
    if buf.len() < offset + total {
        return Err(DecodeError::new(DecodeErrorKind::ShortBuffer, offset));
    }

    let footer = offset + HEADER_SIZE + declared_payload_size as usize;
    if !marker_at(buf, footer, &PAYLOAD_END_MARKER) {
        return Err(DecodeError::new(
            DecodeErrorKind::BadEndMarker(EndMarker::PayloadEnd),
            offset,
        ));
    }
    if !marker_at(buf, footer + 8, &FRAME_MARKER) {
        return Err(DecodeError::new(
            DecodeErrorKind::BadEndMarker(EndMarker::FrameEnd),
            offset,
        ));
    }

    let payload = &buf[offset + HEADER_SIZE..footer];

    let text_end = payload.len().min(STATUS_TEXT_SIZE);
    let labels = String::from_utf8_lossy(&payload[..text_end]).into_owned();

    // Records live in [300, 600); a truncated tail yields fewer records
    // rather than a decode failure.
    let records_end = payload.len().min(STATUS_BYTES_SIZE);
    let records = if records_end > STATUS_TEXT_SIZE {
        &payload[STATUS_TEXT_SIZE..records_end]
    } else {
        &[][..]
    };
    let sensors = records
        .chunks_exact(STATUS_RECORD_SIZE)
        .map(|r| SensorFlags {
            act: r[0],
            lls: r[1],
            sls: r[2],
            fls: r[3],
        })
        .collect();

    Ok(SensorStatus {
        frame_number,
        declared_payload_size,
        sensor_count,
        status_size,
        labels,
        sensors,
        timestamp: 0.0,
    })
}

/// Check whether `buf` at `offset` starts a plausible status frame (marker
/// plus the fixed header equalities). The resync predicate for the status
/// stream; the declared payload size is variable and is not checked here.
pub fn header_matches_at(buf: &[u8], offset: usize) -> bool {
    if buf.len() < offset + HEADER_SIZE {
        return false;
    }
    marker_at(buf, offset, &FRAME_MARKER)
        && read_u32_le(buf, offset + 12) == SENSOR_COUNT
        && read_u32_le(buf, offset + 16) as usize == STATUS_BYTES_SIZE
}

/// Build a well-formed status frame for tests and tools.
///
/// `labels` fills the text region (truncated/zero-padded to 300 bytes) and
/// `flags` the record region; the payload is zero-padded out to
/// `declared_payload_size`. The checksum field is written as zero.
pub fn encode(
    frame_number: u32,
    labels: &str,
    flags: &[SensorFlags],
    declared_payload_size: u32,
) -> Vec<u8> {
    assert!(
        declared_payload_size as usize >= STATUS_BYTES_SIZE,
        "declared payload must cover the status region"
    );

    let mut frame = Vec::with_capacity(frame_size(declared_payload_size));
    frame.extend_from_slice(&FRAME_MARKER);
    frame.extend_from_slice(&frame_number.to_le_bytes());
    frame.extend_from_slice(&declared_payload_size.to_le_bytes());
    frame.extend_from_slice(&SENSOR_COUNT.to_le_bytes());
    frame.extend_from_slice(&(STATUS_BYTES_SIZE as u32).to_le_bytes());

    let mut text = [0u8; STATUS_TEXT_SIZE];
    let bytes = labels.as_bytes();
    let n = bytes.len().min(STATUS_TEXT_SIZE);
    text[..n].copy_from_slice(&bytes[..n]);
    frame.extend_from_slice(&text);

    for f in flags.iter().take(SENSOR_COUNT as usize) {
        frame.extend_from_slice(&[f.act, f.lls, f.sls, f.fls]);
    }
    frame.resize(HEADER_SIZE + declared_payload_size as usize, 0);

    frame.extend_from_slice(&PAYLOAD_END_MARKER);
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&FRAME_MARKER);
    frame
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const OBSERVED_PAYLOAD: u32 = 38_400;

    fn all_active() -> Vec<SensorFlags> {
        vec![
            SensorFlags {
                act: 1,
                lls: 0,
                sls: 0,
                fls: 0,
            };
            64
        ]
    }

    #[test]
    fn test_roundtrip_all_active() {
        let frame = encode(1, "OPM-A1", &all_active(), OBSERVED_PAYLOAD);
        assert_eq!(frame.len(), frame_size(OBSERVED_PAYLOAD));

        let status = decode(&frame, 0).unwrap();
        assert_eq!(status.frame_number, 1);
        assert_eq!(status.declared_payload_size, OBSERVED_PAYLOAD);
        assert_eq!(status.sensor_count, 64);
        assert_eq!(status.status_size, 600);
        assert_eq!(status.sensors.len(), 64);
        for flags in &status.sensors {
            assert_eq!(
                *flags,
                SensorFlags {
                    act: 1,
                    lls: 0,
                    sls: 0,
                    fls: 0
                }
            );
        }
        assert!(status.labels.starts_with("OPM-A1"));
    }

    #[test]
    fn test_distinct_records_kept_in_order() {
        let flags: Vec<SensorFlags> = (0..64)
            .map(|i| SensorFlags {
                act: i as u8,
                lls: 1,
                sls: 2,
                fls: 3,
            })
            .collect();
        let frame = encode(5, "", &flags, OBSERVED_PAYLOAD);
        let status = decode(&frame, 0).unwrap();
        for (i, f) in status.sensors.iter().enumerate() {
            assert_eq!(f.act, i as u8);
        }
    }

    #[test]
    fn test_short_buffer() {
        let frame = encode(1, "", &all_active(), OBSERVED_PAYLOAD);
        // Header present but payload incomplete.
        let err = decode(&frame[..HEADER_SIZE + 100], 0).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::ShortBuffer);
        // Not even a header.
        let err = decode(&frame[..10], 0).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::ShortBuffer);
    }

    #[test]
    fn test_bad_sensor_count() {
        let mut frame = encode(1, "", &all_active(), OBSERVED_PAYLOAD);
        frame[12..16].copy_from_slice(&65u32.to_le_bytes());
        assert_eq!(
            decode(&frame, 0).unwrap_err().kind,
            DecodeErrorKind::BadHeaderValue(HeaderField::SensorCount)
        );
    }

    #[test]
    fn test_bad_status_size() {
        let mut frame = encode(1, "", &all_active(), OBSERVED_PAYLOAD);
        frame[16..20].copy_from_slice(&601u32.to_le_bytes());
        assert_eq!(
            decode(&frame, 0).unwrap_err().kind,
            DecodeErrorKind::BadHeaderValue(HeaderField::StatusSize)
        );
    }

    #[test]
    fn test_bad_footer_markers() {
        let base = encode(1, "", &all_active(), OBSERVED_PAYLOAD);
        let footer = HEADER_SIZE + OBSERVED_PAYLOAD as usize;

        let mut frame = base.clone();
        frame[footer] = b'X';
        assert_eq!(
            decode(&frame, 0).unwrap_err().kind,
            DecodeErrorKind::BadEndMarker(EndMarker::PayloadEnd)
        );

        let mut frame = base;
        frame[footer + 8] = b'X';
        assert_eq!(
            decode(&frame, 0).unwrap_err().kind,
            DecodeErrorKind::BadEndMarker(EndMarker::FrameEnd)
        );
    }

    #[test]
    fn test_partial_records_dropped_without_failing() {
        // Declared payload ends 2 bytes into record 38: 300 text bytes plus
        // 38 full records plus a fragment.
        let declared = (STATUS_TEXT_SIZE + 38 * STATUS_RECORD_SIZE + 2) as u32;
        let mut frame = Vec::new();
        frame.extend_from_slice(&FRAME_MARKER);
        frame.extend_from_slice(&2u32.to_le_bytes());
        frame.extend_from_slice(&declared.to_le_bytes());
        frame.extend_from_slice(&SENSOR_COUNT.to_le_bytes());
        frame.extend_from_slice(&(STATUS_BYTES_SIZE as u32).to_le_bytes());
        frame.resize(HEADER_SIZE + declared as usize, 1);
        frame.extend_from_slice(&PAYLOAD_END_MARKER);
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&FRAME_MARKER);

        let status = decode(&frame, 0).unwrap();
        assert_eq!(status.sensors.len(), 38);
    }

    #[test]
    fn test_labels_lossy_decode() {
        let mut frame = encode(1, "probe", &all_active(), OBSERVED_PAYLOAD);
        // Invalid UTF-8 inside the text region must not fail the frame.
        frame[HEADER_SIZE + 10] = 0xFF;
        let status = decode(&frame, 0).unwrap();
        assert!(status.labels.starts_with("probe"));
    }

    #[test]
    fn test_header_matches_at() {
        let frame = encode(1, "", &all_active(), OBSERVED_PAYLOAD);
        assert!(header_matches_at(&frame, 0));
        assert!(!header_matches_at(&frame, 1));
    }

    #[test]
    fn test_decode_is_pure() {
        let frame = encode(4, "x", &all_active(), OBSERVED_PAYLOAD);
        assert_eq!(decode(&frame, 0).unwrap(), decode(&frame, 0).unwrap());
    }
}
