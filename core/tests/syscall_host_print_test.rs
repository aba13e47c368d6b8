use std::sync::{Arc, Mutex};

use psx_core::bus::{Bus, BusOptions, DeviceBundle};
use psx_core::cdrom::Cdrom;
use psx_core::cpu::{Cpu, StepResult};
use psx_core::gpu::Gpu;
use psx_core::log::{LogRecord, LogSink, Logger};
use psx_core::spu::Spu;

struct CaptureSink(Arc<Mutex<Vec<String>>>);

impl LogSink for CaptureSink {
    fn log(&self, record: &LogRecord<'_>) {
        self.0.lock().unwrap().push(format!("{}", record.message));
    }
}

#[test]
fn syscall_with_r2_ff03_prints_string_and_skips_the_exception_path() {
    let mut cpu = Cpu::new();
    let mut bus = Bus::new(BusOptions::default());
    let mut gpu = Gpu::new();
    let mut spu = Spu::new();
    let mut cdrom = Cdrom::new();

    let lines = Arc::new(Mutex::new(Vec::new()));
    let mut logger = Logger::new();
    logger.add_sink(Arc::new(CaptureSink(lines.clone())));
    cpu.set_logger(logger);

    cpu.reset(0x8000_0000);
    bus.ram[0..4].copy_from_slice(&0x0000_000Cu32.to_le_bytes()); // SYSCALL
    bus.ram[0x1000..0x1006].copy_from_slice(b"HELLO\0");
    cpu.regs[2] = 0xFF03;
    cpu.regs[4] = 0x8000_1000;

    let mut dev = DeviceBundle { gpu: &mut gpu, spu: &mut spu, cdrom: &mut cdrom };
    let result = cpu.step(&mut bus, &mut dev);

    assert_eq!(result, StepResult::Ok);
    assert_eq!(cpu.cause & 0x7C, 0, "no exception code should be latched");
    assert_eq!(cpu.pc, 0x8000_0004, "pc should advance normally, not jump to the exception vector");
    assert_eq!(&*lines.lock().unwrap(), &["HELLO".to_string()]);
}
