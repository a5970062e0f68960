//! Pinning threads to logical CPUs

use std::io;

/// Restricts the calling thread to one logical CPU
pub trait CpuAffinity: Send + Sync {
    fn pin_current_thread(&self, cpu: usize) -> io::Result<()>;
}

/// Leaves threads wherever the scheduler puts them
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAffinity;

impl CpuAffinity for NoAffinity {
    fn pin_current_thread(&self, _cpu: usize) -> io::Result<()> {
        Ok(())
    }
}

/// `sched_setaffinity` on the calling thread
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedAffinity;

#[cfg(target_os = "linux")]
impl CpuAffinity for SchedAffinity {
    fn pin_current_thread(&self, cpu: usize) -> io::Result<()> {
        if cpu >= libc::CPU_SETSIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cpu {cpu} exceeds the affinity mask size"),
            ));
        }

        // SAFETY: cpu_set_t is plain data and `cpu` is within CPU_SETSIZE.
        // Pid 0 targets the calling thread.
        let result = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(cpu, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Logical CPU ids the calling thread may run on, in ascending order
#[cfg(target_os = "linux")]
pub fn allowed_cpus() -> io::Result<Vec<usize>> {
    // SAFETY: cpu_set_t is plain data and the size matches the buffer.
    // Pid 0 targets the calling thread.
    let set = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Err(io::Error::last_os_error());
        }
        set
    };
    Ok(cpus_in_set(&set))
}

#[cfg(target_os = "linux")]
fn cpus_in_set(set: &libc::cpu_set_t) -> Vec<usize> {
    (0..libc::CPU_SETSIZE as usize)
        // SAFETY: every index is below CPU_SETSIZE
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, set) })
        .collect()
}

/// Logical CPU ids the calling thread may run on
#[cfg(not(target_os = "linux"))]
pub fn allowed_cpus() -> io::Result<Vec<usize>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread affinity is not supported on this platform",
    ))
}
