use num_format::{Locale, ToFormattedString};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLIDING_WINDOW_SIZE: u64 = 2; // seconds
const BATCH_PER_CHECK: u64 = 1000;

static STOP: AtomicBool = AtomicBool::new(false);

// Padded to a cache line so workers do not contend on counters.
#[repr(C)]
#[derive(Default)]
struct WorkerStats {
    count: AtomicU64,
    _padding: [u64; 15],
}

/// Run `func` on every physical core but one until Ctrl-C, printing the
/// combined call rate every couple of seconds.
pub fn test_throughput<F>(func: F)
where
    F: Fn() + Sync + Send + 'static,
{
    if let Err(err) = ctrlc::set_handler(|| STOP.store(true, Ordering::SeqCst)) {
        eprintln!("cannot install the Ctrl-C handler: {}", err);
        return;
    }

    let num_threads = num_cpus::get_physical().max(2);
    println!("Number of threads: {}", num_threads);
    let func = Arc::new(func);
    let stats: Arc<Vec<WorkerStats>> =
        Arc::new((0..num_threads).map(|_| WorkerStats::default()).collect());

    let mut handles = Vec::with_capacity(num_threads);
    let monitor_stats = Arc::clone(&stats);
    handles.push(thread::spawn(move || {
        let mut window_start = Instant::now();
        let mut last_total = 0;
        while !STOP.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(500));
            let elapsed = window_start.elapsed();
            if elapsed.as_secs() < SLIDING_WINDOW_SIZE {
                continue;
            }
            let total: u64 = monitor_stats
                .iter()
                .map(|stat| stat.count.load(Ordering::Relaxed))
                .sum();
            let throughput = ((total - last_total) as f64 / elapsed.as_secs_f64()) as u64;
            println!(
                "Throughput: {} iterations/sec",
                throughput.to_formatted_string(&Locale::en)
            );
            last_total = total;
            window_start = Instant::now();
        }
    }));

    for thread_index in 0..num_threads - 1 {
        let stats = Arc::clone(&stats);
        let func = Arc::clone(&func);
        handles.push(thread::spawn(move || {
            while !STOP.load(Ordering::SeqCst) {
                for _ in 0..BATCH_PER_CHECK {
                    func();
                }
                stats[thread_index]
                    .count
                    .fetch_add(BATCH_PER_CHECK, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }
}
