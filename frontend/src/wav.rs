use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use psx_core::spu::WavWriter;

/// Streams 16-bit stereo PCM frames to a RIFF/WAVE file, patching the size
/// fields in the header once the stream ends.
pub struct WavFileWriter {
    file: File,
    sample_rate: u32,
    frames_written: u32,
}

impl WavFileWriter {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> io::Result<Self> {
        let mut file = File::create(path)?;
        write_placeholder_header(&mut file, sample_rate)?;
        Ok(Self { file, sample_rate, frames_written: 0 })
    }
}

fn write_placeholder_header(file: &mut File, sample_rate: u32) -> io::Result<()> {
    let byte_rate = sample_rate * 2 * 2;
    file.write_all(b"RIFF")?;
    file.write_all(&0u32.to_le_bytes())?; // patched on drop
    file.write_all(b"WAVE")?;
    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?; // PCM
    file.write_all(&2u16.to_le_bytes())?; // stereo
    file.write_all(&sample_rate.to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&4u16.to_le_bytes())?; // block align
    file.write_all(&16u16.to_le_bytes())?; // bits per sample
    file.write_all(b"data")?;
    file.write_all(&0u32.to_le_bytes())?; // patched on drop
    Ok(())
}

impl WavWriter for WavFileWriter {
    fn write_frame(&mut self, l: i16, r: i16) {
        let _ = self.file.write_all(&l.to_le_bytes());
        let _ = self.file.write_all(&r.to_le_bytes());
        self.frames_written += 1;
    }
}

impl Drop for WavFileWriter {
    fn drop(&mut self) {
        let data_bytes = self.frames_written * 4;
        let riff_size = 36 + data_bytes;
        if self.file.seek(SeekFrom::Start(4)).is_ok() {
            let _ = self.file.write_all(&riff_size.to_le_bytes());
        }
        if self.file.seek(SeekFrom::Start(40)).is_ok() {
            let _ = self.file.write_all(&data_bytes.to_le_bytes());
        }
        let _ = self.sample_rate;
    }
}
