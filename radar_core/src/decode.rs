//! Frame decoding: opaque byte frames → detection batches.
//!
//! `decode` is a pure function of its input; a malformed frame fails with a
//! [`DecodeError`] carrying the byte offset and leaves no state behind.
//!
//! ## Wire format (little-endian)
//!
//! ```text
//! header (8 bytes):  magic u32 | version u8 | kind u8 | count u16
//! record (112 bytes, × count):
//!   detection_id u64 | timestamp_ns u64 | beam_id u32 | flags u32
//!   px py pz vx vy vz range azimuth elevation snr rcs   (11 × f64)
//! ```
//!
//! Flag bit 0 marks the velocity fields as valid (Doppler available).

use crate::error::DecodeError;
use crate::types::{BeamId, Detection, DetectionId, Timestamp};
use byteorder::{ByteOrder, LittleEndian};
use nalgebra::Vector3;
use std::f64::consts::{FRAC_PI_2, PI};

pub const FRAME_MAGIC: u32 = 0x5244_4154; // "RDAT"
pub const FRAME_VERSION: u8 = 1;
/// Message kind: batch of thresholded detections.
pub const KIND_DETECTION_BATCH: u8 = 0x01;

pub const HEADER_LEN: usize = 8;
pub const RECORD_LEN: usize = 112;

/// Velocity fields carry a valid Doppler estimate.
pub const FLAG_VELOCITY_VALID: u32 = 1 << 0;

/// Decode one complete frame into detections sorted by (timestamp, id).
pub fn decode(bytes: &[u8]) -> Result<Vec<Detection>, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated { offset: bytes.len(), needed: HEADER_LEN - bytes.len() });
    }

    let magic = LittleEndian::read_u32(&bytes[0..4]);
    if magic != FRAME_MAGIC {
        return Err(DecodeError::BadMagic { found: magic });
    }
    let version = bytes[4];
    if version != FRAME_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let kind = bytes[5];
    if kind != KIND_DETECTION_BATCH {
        return Err(DecodeError::UnknownKind(kind));
    }
    let count = LittleEndian::read_u16(&bytes[6..8]) as usize;

    let expected = HEADER_LEN + count * RECORD_LEN;
    if bytes.len() < expected {
        return Err(DecodeError::Truncated {
            offset: bytes.len(),
            needed: expected - bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(DecodeError::TrailingBytes { records: count, extra: bytes.len() - expected });
    }

    let mut detections = Vec::with_capacity(count);
    for i in 0..count {
        let offset = HEADER_LEN + i * RECORD_LEN;
        detections.push(decode_record(&bytes[offset..offset + RECORD_LEN], offset)?);
    }
    detections.sort_by_key(|d| (d.timestamp, d.id));
    Ok(detections)
}

fn decode_record(record: &[u8], base: usize) -> Result<Detection, DecodeError> {
    let id = LittleEndian::read_u64(&record[0..8]);
    let timestamp_ns = LittleEndian::read_u64(&record[8..16]);
    let beam_id = LittleEndian::read_u32(&record[16..20]);
    let flags = LittleEndian::read_u32(&record[20..24]);

    let mut fields = [0.0f64; 11];
    LittleEndian::read_f64_into(&record[24..RECORD_LEN], &mut fields);
    let [px, py, pz, vx, vy, vz, range, azimuth, elevation, snr_db, rcs] = fields;

    let check = |value: f64, field: &'static str, rel: usize| -> Result<f64, DecodeError> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(DecodeError::InvalidField { offset: base + 24 + rel * 8, field })
        }
    };
    let px = check(px, "position.x", 0)?;
    let py = check(py, "position.y", 1)?;
    let pz = check(pz, "position.z", 2)?;
    let range = check(range, "range", 6)?;
    let azimuth = check(azimuth, "azimuth", 7)?;
    let elevation = check(elevation, "elevation", 8)?;
    let snr_db = check(snr_db, "snr", 9)?;
    let rcs = check(rcs, "rcs", 10)?;

    if range < 0.0 {
        return Err(DecodeError::InvalidField { offset: base + 24 + 6 * 8, field: "range" });
    }
    if azimuth.abs() > PI {
        return Err(DecodeError::InvalidField { offset: base + 24 + 7 * 8, field: "azimuth" });
    }
    if elevation.abs() > FRAC_PI_2 {
        return Err(DecodeError::InvalidField { offset: base + 24 + 8 * 8, field: "elevation" });
    }

    let velocity = if flags & FLAG_VELOCITY_VALID != 0 {
        let vx = check(vx, "velocity.x", 3)?;
        let vy = check(vy, "velocity.y", 4)?;
        let vz = check(vz, "velocity.z", 5)?;
        Some(Vector3::new(vx, vy, vz))
    } else {
        None
    };

    Ok(Detection {
        id: DetectionId(id),
        timestamp: Timestamp(timestamp_ns),
        position: Vector3::new(px, py, pz),
        velocity,
        range,
        azimuth,
        elevation,
        snr_db,
        rcs,
        beam_id: BeamId(beam_id),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
