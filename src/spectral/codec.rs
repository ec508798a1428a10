//! Big-endian wire layout of a [`Tick`].
//!
//! ```text
//! offset  type     field
//! 0       int32    dstLength
//! 4       float64  ticksPerSecond
//! 12      float32  sampleRate
//! 16      int32    sampleCount
//! 20      int32    itemCount
//! 24..    itemCount x { int32 index, float32 magnitude }
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::tick::{
    HEADER_SIZE, ITEM_SIZE, MAX_ITEMS_PER_TICK, MAX_TICK_SAMPLES, MAX_TICK_SECONDS, Tick, TickItem,
};
use crate::error::MalformedTickError;

pub fn encode(tick: &Tick) -> Result<Bytes, MalformedTickError> {
    let mut buf = BytesMut::with_capacity(tick.encoded_len());
    encode_into(tick, &mut buf)?;
    Ok(buf.freeze())
}

pub fn encode_into(tick: &Tick, buf: &mut impl BufMut) -> Result<(), MalformedTickError> {
    if tick.items.len() > MAX_ITEMS_PER_TICK {
        return Err(MalformedTickError::Oversized {
            items: tick.items.len(),
            max: MAX_ITEMS_PER_TICK,
        });
    }

    buf.put_i32(to_wire("dstLength", tick.dst_length)?);
    buf.put_f64(tick.ticks_per_second);
    buf.put_f32(tick.sample_rate);
    buf.put_i32(to_wire("sampleCount", tick.sample_count)?);
    buf.put_i32(tick.items.len() as i32);
    for item in &tick.items {
        buf.put_i32(to_wire("index", item.index)?);
        buf.put_f32(item.magnitude);
    }
    Ok(())
}

/// Parse one frame. Bytes after the last item are ignored.
///
/// Rates must be finite and positive, and a tick may cover at most
/// [`MAX_TICK_SECONDS`] and [`MAX_TICK_SAMPLES`].
pub fn decode(mut frame: &[u8]) -> Result<Tick, MalformedTickError> {
    if frame.len() < HEADER_SIZE {
        return Err(MalformedTickError::Truncated {
            len: frame.len(),
            header: HEADER_SIZE,
        });
    }

    let dst_length = from_wire("dstLength", frame.get_i32())?;
    let ticks_per_second = frame.get_f64();
    let sample_rate = frame.get_f32();
    let sample_count = from_wire("sampleCount", frame.get_i32())?;
    let item_count = from_wire("itemCount", frame.get_i32())? as usize;

    if !(ticks_per_second.is_finite() && ticks_per_second >= 1.0 / MAX_TICK_SECONDS) {
        return Err(MalformedTickError::InvalidRate {
            field: "ticksPerSecond",
            value: ticks_per_second,
        });
    }
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(MalformedTickError::InvalidRate {
            field: "sampleRate",
            value: sample_rate as f64,
        });
    }
    if sample_count > MAX_TICK_SAMPLES {
        return Err(MalformedTickError::TooLong {
            sample_count,
            max: MAX_TICK_SAMPLES,
        });
    }

    if item_count * ITEM_SIZE > frame.remaining() {
        return Err(MalformedTickError::ItemsOverrun {
            item_count,
            available: frame.remaining(),
        });
    }

    let mut items = Vec::with_capacity(item_count);
    for _ in 0..item_count {
        let index = from_wire("index", frame.get_i32())?;
        if index >= sample_count {
            return Err(MalformedTickError::IndexOutOfRange {
                index,
                sample_count,
            });
        }
        items.push(TickItem::new(index, frame.get_f32()));
    }

    Ok(Tick {
        items,
        dst_length,
        ticks_per_second,
        sample_rate,
        sample_count,
    })
}

fn to_wire(field: &'static str, value: u32) -> Result<i32, MalformedTickError> {
    i32::try_from(value).map_err(|_| MalformedTickError::NegativeField {
        field,
        value: value as i32,
    })
}

fn from_wire(field: &'static str, value: i32) -> Result<u32, MalformedTickError> {
    u32::try_from(value).map_err(|_| MalformedTickError::NegativeField { field, value })
}
