use std::env;

/// Configuration for benchmarks, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Simulated storage latency in milliseconds (from DB_LATENCY_MS env var, defaults to 5)
    pub db_latency_ms: u64,

    /// Number of seeded rows (from BENCH_ROWS env var, defaults to 1000)
    pub rows: usize,

    /// Sample size for benchmarks (from BENCH_SAMPLE_SIZE env var, defaults to 50)
    pub sample_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            db_latency_ms: env_or("DB_LATENCY_MS", 5),
            rows: env_or("BENCH_ROWS", 1000),
            sample_size: env_or("BENCH_SAMPLE_SIZE", 50),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self::default();
        eprintln!("Benchmark Configuration:");
        eprintln!("  DB Latency: {}ms", config.db_latency_ms);
        eprintln!("  Rows: {}", config.rows);
        eprintln!("  Sample Size: {}", config.sample_size);
        config
    }
}

fn env_or<V: std::str::FromStr>(name: &str, default: V) -> V {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
