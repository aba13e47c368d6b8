use std::fs;

use psx_core::cdrom::Cdrom;

fn unique_temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("psx-core-test-{}-{}.bin", std::process::id(), name))
}

#[test]
fn get_tn_on_a_single_data_track_disc_reports_first_and_last_track_one() {
    let path = unique_temp_path("gettn");
    fs::write(&path, vec![0u8; 2048 * 4]).unwrap();

    let mut cd = Cdrom::new();
    cd.insert_disc(path.to_str().unwrap()).unwrap();

    cd.mmio_write8(0, 1);
    cd.mmio_write8(2, 0x1F); // irq_enable
    cd.mmio_write8(0, 0);
    cd.mmio_write8(1, 0x13); // GetTN

    cd.tick(30_000);

    assert!(cd.irq_line());
    assert_eq!(cd.mmio_read8(1), 0x00); // basic_stat: motor off, disc present
    assert_eq!(cd.mmio_read8(1), 0x01); // first track, BCD
    assert_eq!(cd.mmio_read8(1), 0x01); // last track, BCD

    let _ = fs::remove_file(&path);
}
