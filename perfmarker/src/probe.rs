//! Clock frequency measurement
//!
//! The spin probe runs a chain of dependent register operations with a fixed
//! latency. Each step needs the result of the previous one, so the number of
//! steps retired in a window, times the latency, divided by the window length
//! gives the core clock in GHz.
//!
//! On x86_64 the chain is `imul`, which takes three cycles on every current
//! core. Adds with an immediate would be cheaper to time but newer cores
//! fold them at register rename and retire several per cycle.

use std::time::{Duration, Instant};

/// Measures the clock of the CPU the calling thread runs on
pub trait FrequencyProbe: Send + Sync {
    /// Busy-measure for about `window` and return the frequency in GHz.
    /// `cpu` is the logical CPU the caller is pinned to, if any.
    fn measure(&self, cpu: Option<usize>, window: Duration) -> f64;
}

/// Dependent multiply (or add) chain timed with the monotonic clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinProbe;

const STEPS_PER_BLOCK: u64 = 1000;
const BLOCKS_PER_CLOCK_CHECK: u64 = 10;

#[cfg(target_arch = "x86_64")]
const CYCLES_PER_STEP: u64 = 3;

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn spin_block() {
    let mut x: u64 = 1;
    // SAFETY: only touches one scratch register and the flags
    unsafe {
        std::arch::asm!(
            ".rept 1000",
            "imul {x}, {x}",
            ".endr",
            x = inout(reg) x,
            options(nomem, nostack),
        );
    }
    std::hint::black_box(x);
}

// Register-register adds are not eliminated at rename
#[cfg(target_arch = "aarch64")]
const CYCLES_PER_STEP: u64 = 1;

#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn spin_block() {
    let mut x: u64 = 0;
    let step: u64 = 1;
    // SAFETY: only touches two scratch registers
    unsafe {
        std::arch::asm!(
            ".rept 1000",
            "add {x}, {x}, {step}",
            ".endr",
            x = inout(reg) x,
            step = in(reg) step,
            options(nomem, nostack),
        );
    }
    std::hint::black_box(x);
}

// Approximate: the compiler barrier adds latency to every step
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const CYCLES_PER_STEP: u64 = 3;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
fn spin_block() {
    let mut x: u64 = 1;
    for _ in 0..STEPS_PER_BLOCK {
        x = std::hint::black_box(x.wrapping_mul(x));
    }
}

impl SpinProbe {
    /// Measure the current thread's CPU, wherever it is running
    pub fn measure_current(window: Duration) -> f64 {
        let start = Instant::now();
        let mut blocks: u64 = 0;

        let elapsed = loop {
            for _ in 0..BLOCKS_PER_CLOCK_CHECK {
                spin_block();
            }
            blocks += BLOCKS_PER_CLOCK_CHECK;

            let elapsed = start.elapsed();
            if elapsed >= window {
                break elapsed;
            }
        };

        let cycles = blocks * STEPS_PER_BLOCK * CYCLES_PER_STEP;
        cycles as f64 / elapsed.as_nanos().max(1) as f64
    }
}

impl FrequencyProbe for SpinProbe {
    fn measure(&self, _cpu: Option<usize>, window: Duration) -> f64 {
        Self::measure_current(window)
    }
}
