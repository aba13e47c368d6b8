//! CUE/BIN disc image loading: sector geometry detection and CUE sheet
//! parsing (spec §4.4/§7, supplemented from `original_source/src/cdrom/`).

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DiscError {
    #[error("no disc inserted")]
    NoDisc,
    #[error("i/o error reading {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("unrecognized disc image format: {0}")]
    UnrecognizedFormat(String),
    #[error("sector {lba} out of range (disc has {total} sectors)")]
    SectorOutOfRange { lba: u32, total: u32 },
    #[error("malformed cue sheet: {0}")]
    MalformedCue(String),
}

#[derive(Debug, Clone, Copy)]
struct Track {
    start_lba: u32,
}

pub struct Disc {
    data: Vec<u8>,
    sector_size: u32,
    tracks: Vec<Track>,
}

impl Disc {
    pub fn load(path: &str) -> Result<Disc, DiscError> {
        let p = Path::new(path);
        match p.extension().and_then(|e| e.to_str()) {
            Some("cue") => Self::load_cue(p),
            Some("bin") | Some("img") | Some("iso") => Self::load_bin(p),
            _ => Self::load_bin(p),
        }
    }

    fn load_bin(path: &Path) -> Result<Disc, DiscError> {
        let data = fs::read(path).map_err(|e| DiscError::Io { path: path.display().to_string(), source: e })?;
        let sector_size = detect_sector_size(&data)?;
        Ok(Disc { data, sector_size, tracks: vec![Track { start_lba: 0 }] })
    }

    fn load_cue(cue_path: &Path) -> Result<Disc, DiscError> {
        let text = fs::read_to_string(cue_path).map_err(|e| DiscError::Io { path: cue_path.display().to_string(), source: e })?;
        let mut bin_path: Option<PathBuf> = None;
        let mut tracks = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("FILE ") {
                let name = rest.split('"').nth(1).ok_or_else(|| DiscError::MalformedCue(line.to_string()))?;
                bin_path = Some(cue_path.parent().unwrap_or(Path::new(".")).join(name));
            } else if line.starts_with("INDEX 01") {
                let msf = line.rsplit(' ').next().ok_or_else(|| DiscError::MalformedCue(line.to_string()))?;
                tracks.push(Track { start_lba: parse_msf(msf)? });
            }
        }
        let bin_path = bin_path.ok_or_else(|| DiscError::MalformedCue("no FILE directive".into()))?;
        let data = fs::read(&bin_path).map_err(|e| DiscError::Io { path: bin_path.display().to_string(), source: e })?;
        let sector_size = detect_sector_size(&data)?;
        if tracks.is_empty() {
            tracks.push(Track { start_lba: 0 });
        }
        Ok(Disc { data, sector_size, tracks })
    }

    pub fn sector_count(&self) -> u32 {
        (self.data.len() as u32) / self.sector_size
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len().max(1)
    }

    /// Start LBA of 1-based `track_number`, or the disc's end for the 0xAA
    /// leadout pseudo-track.
    pub fn track_start_lba(&self, track_number: u8) -> u32 {
        if track_number == 0xAA {
            return self.sector_count();
        }
        if track_number == 0 {
            return 0;
        }
        self.tracks.get(track_number as usize - 1).map(|t| t.start_lba).unwrap_or(0)
    }

    /// 1-based number of the track whose start LBA is the highest one at or
    /// before `lba`.
    pub fn track_containing(&self, lba: u32) -> u8 {
        let mut best = 1u8;
        let mut best_start = 0u32;
        for (i, t) in self.tracks.iter().enumerate() {
            if t.start_lba <= lba && t.start_lba >= best_start {
                best_start = t.start_lba;
                best = (i + 1) as u8;
            }
        }
        best
    }

    fn sector_offset(&self, lba: u32) -> Result<usize, DiscError> {
        let total = self.sector_count();
        if lba >= total {
            return Err(DiscError::SectorOutOfRange { lba, total });
        }
        Ok((lba as usize) * self.sector_size as usize)
    }

    /// Returns the 2048-byte user-data payload of a Mode 1 or Mode 2 Form 1
    /// sector, stripping sync/header/subheader/EDC as needed.
    pub fn read_sector_2048(&self, lba: u32, buf: &mut [u8; 2048]) -> Result<(), DiscError> {
        let off = self.sector_offset(lba)?;
        let sector = &self.data[off..off + self.sector_size as usize];
        let data_off = match self.sector_size {
            2048 => 0,
            2352 => 16, // sync(12) + header(3) + mode(1)
            2336 => 8,  // subheader(8), Mode 2 Form 1/2 raw without sync/header
            _ => 0,
        };
        buf.copy_from_slice(&sector[data_off..data_off + 2048]);
        Ok(())
    }

    /// Returns the full raw sector bytes (used for XA subheader inspection
    /// and region string sniffing).
    pub fn read_raw_sector_data(&self, lba: u32) -> Result<Vec<u8>, DiscError> {
        let off = self.sector_offset(lba)?;
        Ok(self.data[off..off + self.sector_size as usize].to_vec())
    }

    pub fn read_system_cnf(&self) -> Option<Vec<u8>> {
        super::iso9660::find_file(self, "SYSTEM.CNF;1").and_then(|(lba, size)| {
            let mut out = Vec::with_capacity(size as usize);
            let mut remaining = size as usize;
            let mut l = lba;
            let mut buf = [0u8; 2048];
            while remaining > 0 {
                self.read_sector_2048(l, &mut buf).ok()?;
                let take = remaining.min(2048);
                out.extend_from_slice(&buf[..take]);
                remaining -= take;
                l += 1;
            }
            Some(out)
        })
    }
}

fn detect_sector_size(data: &[u8]) -> Result<u32, DiscError> {
    if data.len() % 2352 == 0 {
        Ok(2352)
    } else if data.len() % 2336 == 0 {
        Ok(2336)
    } else if data.len() % 2048 == 0 {
        Ok(2048)
    } else {
        Err(DiscError::UnrecognizedFormat(format!("length {} is not a multiple of any known sector size", data.len())))
    }
}

fn parse_msf(s: &str) -> Result<u32, DiscError> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(DiscError::MalformedCue(s.to_string()));
    }
    let mm: u32 = parts[0].parse().map_err(|_| DiscError::MalformedCue(s.to_string()))?;
    let ss: u32 = parts[1].parse().map_err(|_| DiscError::MalformedCue(s.to_string()))?;
    let ff: u32 = parts[2].parse().map_err(|_| DiscError::MalformedCue(s.to_string()))?;
    Ok((mm * 60 + ss) * 75 + ff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_2048_byte_iso_sectors() {
        let data = vec![0u8; 2048 * 4];
        assert_eq!(detect_sector_size(&data).unwrap(), 2048);
    }

    #[test]
    fn detects_2352_byte_raw_sectors() {
        let data = vec![0u8; 2352 * 3];
        assert_eq!(detect_sector_size(&data).unwrap(), 2352);
    }

    #[test]
    fn parses_msf_into_lba() {
        assert_eq!(parse_msf("00:02:00").unwrap(), 150);
    }
}
