//! Wire-frame encoding: detections → the byte format DECODE consumes.
//!
//! This is the simulator's half of the ingestion contract; the layout
//! constants come from `radar_core::decode` so the two sides cannot drift.

use byteorder::{LittleEndian, WriteBytesExt};
use nalgebra::Vector3;
use radar_core::decode::{FLAG_VELOCITY_VALID, FRAME_MAGIC, FRAME_VERSION, KIND_DETECTION_BATCH};
use radar_core::types::Detection;

/// Encode one complete detection-batch frame.
pub fn encode_frame(detections: &[Detection]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + detections.len() * 112);
    // The writer side of Vec<u8> cannot fail; unwraps would be unreachable
    let _ = buf.write_u32::<LittleEndian>(FRAME_MAGIC);
    let _ = buf.write_u8(FRAME_VERSION);
    let _ = buf.write_u8(KIND_DETECTION_BATCH);
    let _ = buf.write_u16::<LittleEndian>(detections.len() as u16);

    for d in detections {
        let _ = buf.write_u64::<LittleEndian>(d.id.0);
        let _ = buf.write_u64::<LittleEndian>(d.timestamp.0);
        let _ = buf.write_u32::<LittleEndian>(d.beam_id.0);
        let flags = if d.velocity.is_some() { FLAG_VELOCITY_VALID } else { 0 };
        let _ = buf.write_u32::<LittleEndian>(flags);
        let velocity = d.velocity.unwrap_or_else(Vector3::zeros);
        for value in [
            d.position.x,
            d.position.y,
            d.position.z,
            velocity.x,
            velocity.y,
            velocity.z,
            d.range,
            d.azimuth,
            d.elevation,
            d.snr_db,
            d.rcs,
        ] {
            let _ = buf.write_f64::<LittleEndian>(value);
        }
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
