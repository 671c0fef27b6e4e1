use std::env;
use std::fs::File;
use std::io::{self, Read};
use std::process;

use tracing_subscriber::EnvFilter;

use otoppc::cpu::asm;
use otoppc::{gunzip, Backend, CoreConfig, Machine, RunExit};

fn parse_hex(s: &str) -> Option<u32> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn usage(prog: &str) -> ! {
    eprintln!(
        "Usage: {} <image> [--load <addr>] [--entry <addr>] [--ram <mb>] [--max <insns>] \
         [--backend threaded|native] [--no-jit] [--trace]\n       {} --demo",
        prog, prog
    );
    process::exit(1);
}

/// Sum of 1..=1000 in r3, then spin
fn demo_program() -> Vec<u8> {
    asm::assemble(&[
        asm::li(3, 0),
        asm::li(4, 1000),
        asm::mtctr(4),
        asm::add(3, 3, 4),
        asm::addi(4, 4, -1),
        asm::bdnz(-8),
        asm::b(0),
    ])
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let mut config = CoreConfig::from_env();
    let mut image_path = String::new();
    let mut load_addr = 0x1000u32;
    let mut entry: Option<u32> = None;
    let mut max_insns = 100_000_000u64;
    let mut trace = false;
    let mut demo = false;

    let mut i = 1;
    while i < args.len() {
        let value = |i: usize| args.get(i + 1).map(String::as_str).unwrap_or_else(|| usage(&args[0]));
        match args[i].as_str() {
            "--ram" => {
                config.ram_size_mb = value(i).parse().unwrap_or_else(|_| usage(&args[0]));
                i += 1;
            }
            "--load" => {
                load_addr = parse_hex(value(i)).unwrap_or_else(|| usage(&args[0]));
                i += 1;
            }
            "--entry" => {
                entry = Some(parse_hex(value(i)).unwrap_or_else(|| usage(&args[0])));
                i += 1;
            }
            "--max" => {
                max_insns = value(i).parse().unwrap_or_else(|_| usage(&args[0]));
                i += 1;
            }
            "--backend" => {
                config.backend = Backend::parse(value(i)).unwrap_or_else(|| usage(&args[0]));
                i += 1;
            }
            "--no-jit" => config.jit = false,
            "--trace" => trace = true,
            "--demo" => demo = true,
            arg if !arg.starts_with('-') => image_path = arg.to_string(),
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
            }
        }
        i += 1;
    }

    let image = if demo {
        max_insns = max_insns.min(10_000);
        demo_program()
    } else if image_path.is_empty() {
        usage(&args[0]);
    } else {
        let mut f = File::open(&image_path)?;
        let mut data = Vec::new();
        f.read_to_end(&mut data)?;
        gunzip(&data)?
    };

    let mut machine = Machine::new(config).map_err(io::Error::other)?;
    machine.load_image(load_addr, &image).map_err(io::Error::other)?;
    machine.regs_mut().pc = entry.unwrap_or(load_addr);
    if trace {
        machine.interrupt_line().set_trace(true);
    }

    println!("Loaded {} bytes at {:#010x}, entry {:#010x}", image.len(), load_addr, machine.regs().pc);

    let exit = machine.run(max_insns);
    let regs = machine.regs();
    let stats = machine.jit_stats();

    println!("Exit: {:?} after {} instructions", exit, machine.instruction_count());
    println!("PC {:#010x}  LR {:#010x}  CTR {:#010x}  CR {:#010x}  MSR {:#010x}", regs.pc, regs.lr, regs.ctr, regs.cr, regs.msr);
    for row in 0..8 {
        let line: Vec<String> = (0..4)
            .map(|col| {
                let r = row * 4 + col;
                format!("r{:<2} {:#010x}", r, regs.gpr[r])
            })
            .collect();
        println!("{}", line.join("  "));
    }
    println!(
        "JIT: {} compiles, {} hits, {} misses ({:.1}% hit rate), {} chained, {} invalidations, {} flushes",
        stats.compiles,
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0,
        stats.chained,
        stats.invalidations,
        stats.flushes
    );

    if exit == RunExit::Stopped {
        process::exit(2);
    }
    Ok(())
}
