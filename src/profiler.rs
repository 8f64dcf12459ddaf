//! Hand-rolled CPU profiler: per-opcode execution counters plus a wall-clock
//! timer, exported as folded-stack-style text. No sampling, no external
//! profiling crate: counts instruction dispatches directly rather than
//! reaching for `pprof`/`perf` bindings.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Profiler {
    backend: &'static str,
    started: Instant,
    total: Duration,
    counts: HashMap<&'static str, u64>,
}

impl Profiler {
    pub fn new(backend: &'static str) -> Self {
        Profiler { backend, started: Instant::now(), total: Duration::ZERO, counts: HashMap::new() }
    }

    /// Called once per fetch-decode-dispatch iteration with the mnemonic of
    /// the opcode about to execute.
    pub fn record(&mut self, op_name: &'static str) {
        *self.counts.entry(op_name).or_insert(0) += 1;
    }

    pub fn finish(&mut self) {
        self.total = self.started.elapsed();
    }

    /// Folded-stack-style text: one `op count` line per opcode, most
    /// frequent first, with a header naming the backend and wall time.
    pub fn render(&self) -> String {
        let mut rows: Vec<(&'static str, u64)> = self.counts.iter().map(|(&k, &v)| (k, v)).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let total_ops: u64 = rows.iter().map(|(_, c)| c).sum();
        let mut out = String::new();
        out.push_str(&format!("# backend={} wall_time_us={} total_ops={}\n", self.backend, self.total.as_micros(), total_ops));
        for (name, count) in rows {
            out.push_str(&format!("{name} {count}\n"));
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_opcode_and_sort_descending() {
        let mut p = Profiler::new("stack");
        p.record("Add");
        p.record("Add");
        p.record("Push");
        p.finish();
        let rendered = p.render();
        let add_line = rendered.lines().find(|l| l.starts_with("Add ")).unwrap();
        assert_eq!(add_line, "Add 2");
        let push_pos = rendered.find("Push 1").unwrap();
        let add_pos = rendered.find("Add 2").unwrap();
        assert!(add_pos < push_pos);
    }
}
