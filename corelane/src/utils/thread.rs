use anyhow::{Context, Result, anyhow};
use nix::sched::{CpuSet, sched_getaffinity, sched_setaffinity};
use nix::unistd::Pid;
use std::ffi::CStr;

const MAX_PTHREAD_NAME_LEN: usize = 16;

/// Gets the name of the current thread.
///
/// This uses `pthread_getname_np` on Linux, which reads back the name given
/// through `std::thread::Builder::name` (truncated to 15 bytes).
#[cfg(target_os = "linux")]
pub(crate) fn get_current_thread_name() -> Result<String> {
    // Zero-initialized, so guaranteed to be null-terminated.
    let mut c_name_buf: [libc::c_char; MAX_PTHREAD_NAME_LEN] = [0; MAX_PTHREAD_NAME_LEN];

    let ret = unsafe {
        let thread = libc::pthread_self();
        libc::pthread_getname_np(thread, c_name_buf.as_mut_ptr(), MAX_PTHREAD_NAME_LEN)
    };

    if ret != 0 {
        return Err(anyhow!("pthread_getname_np failed with error code: {}", ret));
    }

    let c_str = unsafe { CStr::from_ptr(c_name_buf.as_ptr()) };
    c_str
        .to_str()
        .map(|s| s.to_string())
        .map_err(|e| anyhow!("Failed to convert thread name from CStr: {}", e))
}

/// Logical CPUs the current process is allowed to run on, in increasing
/// order.
pub(crate) fn allowed_cpus() -> Result<Vec<usize>> {
    let set = sched_getaffinity(Pid::from_raw(0)).context("sched_getaffinity failed")?;

    Ok((0..CpuSet::count())
        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
        .collect())
}

/// Pins the calling thread to a single logical CPU.
pub(crate) fn pin_current_thread(cpu: usize) -> Result<()> {
    let mut set = CpuSet::new();
    set.set(cpu)
        .with_context(|| format!("cpu {cpu} out of range"))?;

    // Pid 0 targets the calling thread.
    sched_setaffinity(Pid::from_raw(0), &set)
        .with_context(|| format!("sched_setaffinity to cpu {cpu} failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_get_thread_name() -> Result<()> {
        let name = thread::Builder::new()
            .name("corelane-test".to_string())
            .spawn(get_current_thread_name)?
            .join()
            .map_err(|_| anyhow!("thread panicked"))??;

        assert_eq!(name, "corelane-test");
        Ok(())
    }

    #[test]
    fn test_allowed_cpus_non_empty() -> Result<()> {
        let cpus = allowed_cpus()?;
        assert!(!cpus.is_empty());
        assert!(cpus.windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    #[test]
    fn test_pin_to_allowed_cpu() -> Result<()> {
        let cpu = allowed_cpus()?[0];

        thread::spawn(move || -> Result<()> {
            pin_current_thread(cpu)?;
            assert_eq!(allowed_cpus()?, vec![cpu]);
            Ok(())
        })
        .join()
        .map_err(|_| anyhow!("thread panicked"))?
    }
}
