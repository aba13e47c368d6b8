use std::fs;

use psx_core::cdrom::Cdrom;

fn unique_temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("psx-core-test-{}-{}.bin", std::process::id(), name))
}

/// Writes a minimal ISO9660 image (PVD + root directory + a SYSTEM.CNF file)
/// whose BOOT line names a `SLUS` executable, identifying it as a US disc.
fn write_us_disc_image(path: &std::path::Path) {
    const SECTORS: usize = 32;
    let mut image = vec![0u8; SECTORS * 2048];

    let cnf = b"BOOT=cdrom:\\SLUS_000.01;1\r\nTCB=4\r\n";

    // PVD at LBA 16: CD001 signature plus the root directory record at its
    // fixed 156-byte offset, pointing at LBA 17 / 2048 bytes.
    let pvd = &mut image[16 * 2048..17 * 2048];
    pvd[1..6].copy_from_slice(b"CD001");
    write_dir_record(&mut pvd[156..190], 17, 2048, true, &[0x00]);

    // Root directory content at LBA 17: "." , ".." , SYSTEM.CNF;1
    let root = &mut image[17 * 2048..18 * 2048];
    write_dir_record(&mut root[0..34], 17, 2048, true, &[0x00]);
    write_dir_record(&mut root[34..68], 17, 2048, true, &[0x01]);
    write_dir_record(&mut root[68..114], 18, cnf.len() as u32, false, b"SYSTEM.CNF;1");

    // SYSTEM.CNF content at LBA 18.
    image[18 * 2048..18 * 2048 + cnf.len()].copy_from_slice(cnf);

    fs::write(path, image).unwrap();
}

/// Fills a directory record slice per the ISO9660 layout `iso9660::parse_dir_record` reads.
fn write_dir_record(block: &mut [u8], lba: u32, size: u32, is_dir: bool, name: &[u8]) {
    block[0] = block.len() as u8;
    block[2..6].copy_from_slice(&lba.to_le_bytes());
    block[10..14].copy_from_slice(&size.to_le_bytes());
    block[25] = if is_dir { 0x02 } else { 0x00 };
    block[32] = name.len() as u8;
    block[33..33 + name.len()].copy_from_slice(name);
}

#[test]
fn get_id_on_a_us_disc_reports_scea_after_ack_and_wait() {
    let path = unique_temp_path("getid");
    write_us_disc_image(&path);

    let mut cd = Cdrom::new();
    cd.insert_disc(path.to_str().unwrap()).unwrap();

    cd.mmio_write8(0, 1);
    cd.mmio_write8(2, 0x1F); // irq_enable
    cd.mmio_write8(0, 0);
    cd.mmio_write8(1, 0x1A); // GetID

    cd.tick(30_000);
    assert!(cd.irq_line(), "INT3 should be asserted after the command delay");
    assert_eq!(cd.mmio_read8(1), 0x00); // basic_stat on the INT3 ack

    cd.mmio_write8(0, 1);
    cd.mmio_write8(3, 0x1F); // ack INT3

    cd.tick(2_000);
    assert!(cd.irq_line(), "INT2 should follow once INT3 is acked and the minimum delay elapses");

    let response: Vec<u8> = (0..8).map(|_| cd.mmio_read8(1)).collect();
    assert_eq!(response, vec![0x00, 0x00, 0x20, 0x00, b'S', b'C', b'E', b'A']);

    let _ = fs::remove_file(&path);
}
