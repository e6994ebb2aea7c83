//! Brain image format: a chunked container holding a full serialized
//! engine.
//!
//! Layout: 8-byte magic, u32 format version, then tagged chunks. Each chunk
//! is `tag: [u8;4]`, `len: u32`, `len` payload bytes. Readers skip chunks
//! with unknown tags, so the format can grow without breaking old readers.

use std::io::{self, Read, Write};

use crate::brain::{Brain, EngineError};

pub const MAGIC: &[u8; 8] = b"GRIDMND1";
pub const VERSION_CURRENT: u32 = 1;

/// Human-inspectable summary, uncompressed JSON.
const TAG_META: [u8; 4] = *b"META";
/// The engine itself, LZ4-compressed JSON.
const TAG_BRAIN: [u8; 4] = *b"BRAN";

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    // Raw LZ4 block; the uncompressed size travels outside the payload.
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

/// A sink that only counts. Used to measure an image without buffering it.
#[derive(Default)]
pub struct CountingWriter {
    written: usize,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

fn write_chunk<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    w.write_all(&tag)?;
    write_u32_le(
        w,
        u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    )?;
    w.write_all(payload)
}

/// Compressed chunk: the payload is an LZ4 block preceded by its
/// uncompressed length (u32).
fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let mut body = Vec::with_capacity(4 + compressed.len());
    write_u32_le(
        &mut body,
        u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    )?;
    body.extend_from_slice(&compressed);
    write_chunk(w, tag, &body)
}

fn read_chunk_lz4(body: &[u8]) -> io::Result<Vec<u8>> {
    if body.len() < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "truncated compressed chunk",
        ));
    }
    let uncompressed_len = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
    decompress_lz4(&body[4..], uncompressed_len)
}

/// Serialize a [`Brain`] into the image format.
pub fn write_image<W: Write>(mut writer: W, brain: &Brain) -> Result<(), EngineError> {
    writer.write_all(MAGIC)?;
    write_u32_le(&mut writer, VERSION_CURRENT)?;

    let meta = serde_json::json!({
        "width": brain.config().width,
        "height": brain.config().height,
        "units": brain.unit_count(),
        "tick": brain.tick(),
    });
    write_chunk(&mut writer, TAG_META, serde_json::to_string(&meta)?.as_bytes())?;

    let payload = serde_json::to_vec(brain)?;
    write_chunk_lz4(&mut writer, TAG_BRAIN, &payload)?;

    writer.flush()?;
    Ok(())
}

/// Read an image back. Unknown chunks are skipped; a missing engine chunk
/// is an error.
pub fn read_image<R: Read>(mut reader: R) -> Result<Brain, EngineError> {
    let magic = read_exact::<8, _>(&mut reader)?;
    if &magic != MAGIC {
        return Err(EngineError::BadImage("wrong magic".into()));
    }
    let version = read_u32_le(&mut reader)?;
    if version != VERSION_CURRENT {
        return Err(EngineError::BadImage(format!(
            "unsupported version {version}"
        )));
    }

    let mut brain = None;
    loop {
        let mut tag = [0u8; 4];
        match reader.read(&mut tag)? {
            0 => break,
            n if n < 4 => reader.read_exact(&mut tag[n..])?,
            _ => {}
        }
        let len = read_u32_le(&mut reader)? as usize;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;

        if tag == TAG_BRAIN {
            let json = read_chunk_lz4(&body)?;
            let decoded: Brain = serde_json::from_slice(&json)?;
            decoded.check_integrity()?;
            brain = Some(decoded);
        }
        // Anything else (including META) is informational.
    }

    brain.ok_or_else(|| EngineError::BadImage("no engine chunk".into()))
}

/// Size in bytes an image of `brain` would occupy, without writing it
/// anywhere.
pub fn image_size(brain: &Brain) -> Result<usize, EngineError> {
    let mut counter = CountingWriter::new();
    write_image(&mut counter, brain)?;
    Ok(counter.written())
}
