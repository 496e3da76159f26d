//! Minimal RIFF/WAVE support for file players and recorders
//!
//! Only 16-bit linear PCM is accepted, which is what file ports in a SIP media
//! stack handle natively.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::MediaResourceError;

/// Sample rate used by recorders
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

/// Size of the canonical header written by [`write_pcm_wav`]
pub const HEADER_LEN: usize = 44;

/// WAV header for 16-bit PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WavHeader {
    riff_id: [u8; 4],
    file_size: u32,
    wave_id: [u8; 4],
    fmt_id: [u8; 4],
    fmt_size: u32,
    audio_format: u16,
    num_channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
    data_id: [u8; 4],
    data_size: u32,
}

impl WavHeader {
    fn mono(sample_rate: u32, num_samples: usize) -> Self {
        let data_size = (num_samples * 2) as u32;
        Self {
            riff_id: *b"RIFF",
            file_size: data_size + 36,
            wave_id: *b"WAVE",
            fmt_id: *b"fmt ",
            fmt_size: 16,
            audio_format: 1,
            num_channels: 1,
            sample_rate,
            byte_rate: sample_rate * 2,
            block_align: 2,
            bits_per_sample: 16,
            data_id: *b"data",
            data_size,
        }
    }

    fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.riff_id)?;
        out.write_all(&self.file_size.to_le_bytes())?;
        out.write_all(&self.wave_id)?;
        out.write_all(&self.fmt_id)?;
        out.write_all(&self.fmt_size.to_le_bytes())?;
        out.write_all(&self.audio_format.to_le_bytes())?;
        out.write_all(&self.num_channels.to_le_bytes())?;
        out.write_all(&self.sample_rate.to_le_bytes())?;
        out.write_all(&self.byte_rate.to_le_bytes())?;
        out.write_all(&self.block_align.to_le_bytes())?;
        out.write_all(&self.bits_per_sample.to_le_bytes())?;
        out.write_all(&self.data_id)?;
        out.write_all(&self.data_size.to_le_bytes())
    }
}

/// Decoded PCM file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavData {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples
    pub samples: Vec<i16>,
}

/// Write mono 16-bit PCM samples as a WAV file, replacing any existing file
pub fn write_pcm_wav(path: &Path, sample_rate: u32, samples: &[i16]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    WavHeader::mono(sample_rate, samples.len()).write_to(&mut out)?;
    for sample in samples {
        out.write_all(&sample.to_le_bytes())?;
    }
    out.flush()
}

/// Read a 16-bit PCM WAV file
pub fn read_pcm_wav(path: &Path) -> Result<WavData, MediaResourceError> {
    let bytes = std::fs::read(path).map_err(|e| MediaResourceError::open_failed(path, e))?;
    parse_pcm_wav(&bytes).map_err(|reason| MediaResourceError::invalid_format(path, reason))
}

/// Parse a 16-bit PCM WAV image, skipping chunks other than `fmt ` and `data`
pub fn parse_pcm_wav(bytes: &[u8]) -> Result<WavData, String> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err("not a RIFF/WAVE file".to_string());
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body_start = offset + 8;
        let body_end = body_start.saturating_add(size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err("truncated fmt chunk".to_string());
                }
                let audio_format = u16::from_le_bytes([body[0], body[1]]);
                let channels = u16::from_le_bytes([body[2], body[3]]);
                let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);
                format = Some((audio_format, channels, sample_rate, bits_per_sample));
            }
            b"data" => {
                let (audio_format, channels, sample_rate, bits) =
                    format.ok_or_else(|| "data chunk before fmt chunk".to_string())?;
                if audio_format != 1 {
                    return Err(format!("unsupported audio format {audio_format}, expected PCM"));
                }
                if bits != 16 {
                    return Err(format!("unsupported sample size {bits} bits, expected 16"));
                }
                if channels == 0 {
                    return Err("zero channels".to_string());
                }
                let samples = body
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                return Ok(WavData {
                    sample_rate,
                    channels,
                    samples,
                });
            }
            _ => {}
        }

        // chunks are word aligned
        offset = body_start.saturating_add(size + (size & 1));
    }

    Err("missing data chunk".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..160)
            .map(|i| ((i as f32 * 0.2).sin() * 8000.0) as i16)
            .collect();

        write_pcm_wav(&path, 8000, &samples).unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().len() as usize,
            HEADER_LEN + samples.len() * 2
        );

        let wav = read_pcm_wav(&path).unwrap();
        assert_eq!(wav.sample_rate, 8000);
        assert_eq!(wav.channels, 1);
        assert_eq!(wav.samples, samples);
    }

    #[test]
    fn test_rejects_non_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.wav");
        std::fs::write(&path, b"ID3\x03not really audio").unwrap();

        let err = read_pcm_wav(&path).unwrap_err();
        assert!(matches!(err, MediaResourceError::InvalidFormat { .. }));
    }

    #[test]
    fn test_rejects_non_pcm() {
        let mut bytes = Vec::new();
        WavHeader::mono(8000, 0).write_to(&mut bytes).unwrap();
        // audio_format lives at offset 20
        bytes[20] = 7;
        assert!(parse_pcm_wav(&bytes).unwrap_err().contains("unsupported audio format"));
    }

    #[test]
    fn test_skips_unknown_chunks() {
        let mut bytes = Vec::new();
        WavHeader::mono(16000, 2).write_to(&mut bytes).unwrap();
        bytes.extend_from_slice(&1i16.to_le_bytes());
        bytes.extend_from_slice(&(-1i16).to_le_bytes());

        // insert an odd-sized LIST chunk between fmt and data
        let mut with_list = bytes[..36].to_vec();
        with_list.extend_from_slice(b"LIST");
        with_list.extend_from_slice(&3u32.to_le_bytes());
        with_list.extend_from_slice(b"abc\0");
        with_list.extend_from_slice(&bytes[36..]);

        let wav = parse_pcm_wav(&with_list).unwrap();
        assert_eq!(wav.sample_rate, 16000);
        assert_eq!(wav.samples, vec![1, -1]);
    }

    #[test]
    fn test_missing_file_is_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_pcm_wav(&dir.path().join("absent.wav")).unwrap_err();
        assert!(matches!(err, MediaResourceError::OpenFailed { .. }));
    }
}
