//! Stream frame encoding
//!
//! Two push-frame formats ride on the camera port. Image frames carry a
//! tag + length header so a client can resynchronize; sensor frames are a
//! fixed header of three u16 fields followed by a float array. All integers
//! little-endian.

use crate::error::{Error, Result};

/// Tag prefixing every image frame
pub const IMAGE_TAG: &[u8; 5] = b"EZIMG";

/// Encode a JPEG payload as a single image frame: tag, u32 LE payload
/// length, payload. Returned as one buffer so the caller can push it with a
/// single write.
pub fn encode_image_frame(jpeg: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(IMAGE_TAG.len() + 4 + jpeg.len());
    frame.extend_from_slice(IMAGE_TAG);
    frame.extend_from_slice(&(jpeg.len() as u32).to_le_bytes());
    frame.extend_from_slice(jpeg);
    frame
}

/// Encode a sensor grid frame: u16 width, u16 height, u16 byte length of
/// the value block, then each value as f32 LE.
pub fn encode_sensor_frame(width: u16, height: u16, values: &[f32]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + values.len() * 4);
    frame.extend_from_slice(&width.to_le_bytes());
    frame.extend_from_slice(&height.to_le_bytes());
    frame.extend_from_slice(&((values.len() * 4) as u16).to_le_bytes());
    for v in values {
        frame.extend_from_slice(&v.to_le_bytes());
    }
    frame
}

/// Decode one image frame from the start of `buf`, returning the JPEG
/// payload and the number of bytes consumed.
pub fn decode_image_frame(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let header_len = IMAGE_TAG.len() + 4;
    if buf.len() < header_len {
        return Err(Error::Framing(format!(
            "image header needs {} bytes, have {}",
            header_len,
            buf.len()
        )));
    }
    if &buf[..IMAGE_TAG.len()] != IMAGE_TAG {
        return Err(Error::Framing("missing image tag".to_string()));
    }
    let len_bytes: [u8; 4] = buf[IMAGE_TAG.len()..header_len]
        .try_into()
        .map_err(|_| Error::Framing("short image length field".to_string()))?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;
    let total = header_len + payload_len;
    if buf.len() < total {
        return Err(Error::Framing(format!(
            "image payload needs {} bytes, have {}",
            payload_len,
            buf.len() - header_len
        )));
    }
    Ok((buf[header_len..total].to_vec(), total))
}

/// Decode one sensor frame from the start of `buf`, returning (width,
/// height, values) and the number of bytes consumed.
pub fn decode_sensor_frame(buf: &[u8]) -> Result<(u16, u16, Vec<f32>, usize)> {
    if buf.len() < 6 {
        return Err(Error::Framing(format!(
            "sensor header needs 6 bytes, have {}",
            buf.len()
        )));
    }
    let width = u16::from_le_bytes([buf[0], buf[1]]);
    let height = u16::from_le_bytes([buf[2], buf[3]]);
    let byte_len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    if byte_len % 4 != 0 {
        return Err(Error::Framing(format!(
            "sensor value block of {} bytes is not float-aligned",
            byte_len
        )));
    }
    let count = byte_len / 4;
    let total = 6 + byte_len;
    if buf.len() < total {
        return Err(Error::Framing(format!(
            "sensor frame declares {} value bytes, have {}",
            byte_len,
            buf.len() - 6
        )));
    }
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let off = 6 + i * 4;
        let bytes: [u8; 4] = buf[off..off + 4]
            .try_into()
            .map_err(|_| Error::Framing("short sensor value".to_string()))?;
        values.push(f32::from_le_bytes(bytes));
    }
    Ok((width, height, values, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_frame_carries_tag_and_length() {
        let frame = encode_image_frame(&[1, 2, 3]);
        assert_eq!(&frame[..5], b"EZIMG");
        assert_eq!(u32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]), 3);
        assert_eq!(&frame[9..], &[1, 2, 3]);

        let (payload, consumed) = decode_image_frame(&frame).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn image_decode_rejects_bad_tag() {
        let mut frame = encode_image_frame(&[9]);
        frame[0] = b'X';
        assert!(decode_image_frame(&frame).is_err());
    }

    #[test]
    fn image_decode_reports_short_payload() {
        let frame = encode_image_frame(&[1, 2, 3, 4]);
        assert!(decode_image_frame(&frame[..frame.len() - 1]).is_err());
    }

    #[test]
    fn sensor_frame_round_trips_an_8x8_grid() {
        let values: Vec<f32> = (0..64).map(|i| i as f32 * 0.25).collect();
        let frame = encode_sensor_frame(8, 8, &values);
        assert_eq!(frame.len(), 6 + 64 * 4);

        let (w, h, decoded, consumed) = decode_sensor_frame(&frame).unwrap();
        assert_eq!((w, h), (8, 8));
        assert_eq!(decoded, values);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn back_to_back_frames_decode_in_sequence() {
        let mut buf = encode_image_frame(&[7; 10]);
        buf.extend_from_slice(&encode_image_frame(&[8; 4]));

        let (first, consumed) = decode_image_frame(&buf).unwrap();
        assert_eq!(first, vec![7; 10]);
        let (second, _) = decode_image_frame(&buf[consumed..]).unwrap();
        assert_eq!(second, vec![8; 4]);
    }
}
