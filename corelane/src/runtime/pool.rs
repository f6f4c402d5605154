use crate::context;
use crate::runtime::Handle;
use crate::sync::Semaphore;
use crate::utils::thread::{allowed_cpus, get_current_thread_name, pin_current_thread};
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::thread;

/// Spawns one thread per worker queue and waits until every spawned thread
/// is bound to the runtime.
///
/// Join handles are stored on the scheduler as soon as each thread exists, so
/// a partial start is still torn down by shutdown.
pub(crate) fn spawn_workers(handle: &Handle) -> Result<()> {
    let cfg = &handle.0.cfg;

    let cpus = if cfg.pin_workers {
        allowed_cpus()?
    } else {
        Vec::new()
    };

    // Counts started threads. Unlike a barrier, a failed spawn can't leave
    // anyone waiting for a party that never comes.
    let started = Arc::new(Semaphore::new(0));
    let mut spawned = 0;
    let mut result = Ok(());

    for index in 0..handle.num_workers() {
        let cpu = (!cpus.is_empty()).then(|| cpus[index % cpus.len()]);

        match spawn_worker_thread(handle.clone(), index, cpu, Arc::clone(&started)) {
            Ok(join) => {
                handle.0.workers.lock().push(join);
                spawned += 1;
            }
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }

    for _ in 0..spawned {
        started.acquire();
    }

    result
}

fn spawn_worker_thread(
    handle: Handle,
    index: usize,
    cpu: Option<usize>,
    started: Arc<Semaphore>,
) -> Result<thread::JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(handle.0.cfg.thread_name.0());

    if let Some(stack_size) = handle.0.cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder
        .spawn(move || {
            context::init_runtime_context(handle.clone(), Some(index));

            if let Some(cpu) = cpu
                && let Err(err) = pin_current_thread(cpu)
            {
                tracing::warn!(worker = index, cpu, error = %err, "failed to pin worker");
            }

            started.release(1);

            tracing::debug!(
                worker = index,
                ?cpu,
                thread = ?get_current_thread_name().ok(),
                "worker started"
            );

            handle.queue(index).run();
            tracing::debug!(worker = index, "worker stopped");
        })
        .with_context(|| format!("failed to spawn worker thread {index}"))
}

pub(crate) fn join_all(workers: Vec<thread::JoinHandle<()>>) -> Result<()> {
    let panicked = workers
        .into_iter()
        .filter_map(|join| join.join().err())
        .count();

    if panicked == 0 {
        Ok(())
    } else {
        Err(anyhow!("{panicked} worker thread(s) panicked"))
    }
}
