//! Minimal ISO9660 primary volume descriptor + directory record walker,
//! just enough to resolve `SYSTEM.CNF` and PS-X EXE paths off a disc image
//! (spec §4.4, §6).

use super::Disc;

const PVD_LBA: u32 = 16;

struct DirRecord {
    lba: u32,
    size: u32,
    is_dir: bool,
    name: String,
}

fn parse_dir_record(block: &[u8]) -> Option<(DirRecord, usize)> {
    let len = block[0] as usize;
    if len == 0 {
        return None;
    }
    let lba = u32::from_le_bytes(block[2..6].try_into().ok()?);
    let size = u32::from_le_bytes(block[10..14].try_into().ok()?);
    let flags = block[25];
    let name_len = block[32] as usize;
    let raw_name = &block[33..33 + name_len];
    let name = String::from_utf8_lossy(raw_name).to_string();
    Some((DirRecord { lba, size, is_dir: flags & 0x02 != 0, name }, len))
}

fn root_directory(disc: &Disc) -> Option<(u32, u32)> {
    let mut buf = [0u8; 2048];
    disc.read_sector_2048(PVD_LBA, &mut buf).ok()?;
    if &buf[1..6] != b"CD001" {
        return None;
    }
    let root_record = &buf[156..190];
    let (rec, _) = parse_dir_record(root_record)?;
    Some((rec.lba, rec.size))
}

fn list_directory(disc: &Disc, lba: u32, size: u32) -> Vec<DirRecord> {
    let mut out = Vec::new();
    let sectors = size.div_ceil(2048);
    let mut buf = [0u8; 2048];
    for s in 0..sectors {
        if disc.read_sector_2048(lba + s, &mut buf).is_err() {
            break;
        }
        let mut pos = 0usize;
        while pos < buf.len() {
            match parse_dir_record(&buf[pos..]) {
                Some((rec, len)) => {
                    pos += len;
                    if rec.name != "\u{0}" && rec.name != "\u{1}" {
                        out.push(rec);
                    }
                }
                None => break,
            }
        }
    }
    out
}

/// Resolves a `/`-separated path (case-insensitive, `;1` version suffix
/// optional) to `(lba, size)`.
pub fn find_file(disc: &Disc, path: &str) -> Option<(u32, u32)> {
    let (mut dir_lba, mut dir_size) = root_directory(disc)?;
    let components: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    if components.is_empty() {
        return None;
    }
    for (i, comp) in components.iter().enumerate() {
        let entries = list_directory(disc, dir_lba, dir_size);
        let target = comp.to_ascii_uppercase();
        let found = entries.iter().find(|e| {
            let n = e.name.to_ascii_uppercase();
            n == target || n == format!("{target};1") || n.trim_end_matches(";1") == target
        })?;
        if i == components.len() - 1 {
            return Some((found.lba, found.size));
        }
        if !found.is_dir {
            return None;
        }
        dir_lba = found.lba;
        dir_size = found.size;
    }
    None
}

/// Pulls the `BOOT=cdrom:\SLUS_000.01;1` style line out of a SYSTEM.CNF
/// buffer and returns the bare filename prefix (e.g. `SLUS_000`).
pub fn extract_boot_prefix(cnf: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(cnf);
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("BOOT") {
            let rest = rest.trim_start_matches(|c| c == '=' || c == ' ');
            let rest = rest.trim_start_matches("cdrom:").trim_start_matches('\\').trim_start_matches('/');
            let name = rest.split(';').next().unwrap_or(rest);
            let name = name.trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_boot_prefix_from_system_cnf_line() {
        let cnf = b"BOOT=cdrom:\\SLUS_000.01;1\r\nTCB=4\r\n";
        assert_eq!(extract_boot_prefix(cnf).as_deref(), Some("SLUS_000.01"));
    }

    #[test]
    fn returns_none_when_boot_line_absent() {
        let cnf = b"TCB=4\r\n";
        assert_eq!(extract_boot_prefix(cnf), None);
    }
}
