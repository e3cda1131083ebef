#![no_main]

use cp1610_core::{
    disassemble_one, Bus, BusConfig, Cpu, CpuConfig, Decoder, Memory, RequestKind,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let extended_isa = data[0] & 1 != 0;
    let words: Vec<u16> = data[2..]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    let decoder = Decoder::new(extended_isa);
    for (i, window) in words.windows(3).enumerate() {
        let address = 0x1000u16.wrapping_add(i as u16);
        let _ = decoder.decode(address, [window[0], window[1], window[2]], data[1] & 1 != 0);
    }

    let Ok(mut bus) = Bus::new(BusConfig::default()) else {
        return;
    };
    if bus
        .register(Box::new(Memory::ram(16, 0, 0x1_0000)), 0, 0xFFFF, "ram")
        .is_err()
    {
        return;
    }
    for (addr, &word) in (0x1000u32..).zip(&words) {
        bus.poke(addr, u32::from(word));
    }

    let mut cpu = Cpu::new(CpuConfig {
        extended_isa,
        randomize_seed: Some(u64::from(data[1])),
        ..CpuConfig::default()
    });
    let _ = cpu.set_cacheable(&mut bus, 0x1000, 0x1FFF);
    let _ = bus
        .req_q_mut()
        .push(RequestKind::Interrupt, u64::from(data[1]) * 4, u64::from(data[1]) * 4 + 40);

    let mut now = 0;
    for _ in 0..64 {
        now += cpu.run(&mut bus, now, 50).consumed;
    }
    let pc = cpu.registers().pc();
    let _ = disassemble_one(pc, |a| bus.peek(u32::from(a)) as u16, false, extended_isa);
});
