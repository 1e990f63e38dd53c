// Copyright 2025 Chronosink Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Event Parsing Benchmarks
//!
//! Measures how fast raw Debezium events become change records.
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench --package chronosink-benches --bench parse_throughput
//! ```

use chronosink_benches::{envelope_events, flattened_events};
use chronosink_core::parser::EventParser;
use chronosink_core::statement::{DeleteBinding, Statement};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn payloads(events: &[chronosink_core::RawEvent]) -> Vec<String> {
    events.iter().filter_map(|e| e.value.clone()).collect()
}

/// Benchmark: Parsing flattened events
fn bench_parse_flattened(c: &mut Criterion) {
    let parser = EventParser::default();
    let mut group = c.benchmark_group("parse_flattened");

    for size in [100, 1000, 10000].iter() {
        let raw = payloads(&flattened_events(*size, "public.users"));
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &raw, |b, raw| {
            b.iter(|| {
                for value in raw {
                    black_box(parser.parse(value).ok());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark: Parsing wrapped envelopes
fn bench_parse_envelope(c: &mut Criterion) {
    let parser = EventParser::default();
    let mut group = c.benchmark_group("parse_envelope");

    for size in [100, 1000, 10000].iter() {
        let raw = payloads(&envelope_events(*size, "users"));
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &raw, |b, raw| {
            b.iter(|| {
                for value in raw {
                    black_box(parser.parse(value).ok());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark: Parsing and rendering statements
fn bench_parse_and_render(c: &mut Criterion) {
    let parser = EventParser::default();
    let raw = payloads(&flattened_events(1000, "public.users"));
    let mut group = c.benchmark_group("parse_and_render");
    group.throughput(Throughput::Elements(raw.len() as u64));

    for binding in [DeleteBinding::Parameters, DeleteBinding::Inline] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{binding:?}")),
            &binding,
            |b, &binding| {
                b.iter(|| {
                    for value in &raw {
                        if let Ok(Some(record)) = parser.parse(value) {
                            if let Ok(statement) = Statement::for_record(&record, parser.id_field()) {
                                black_box(statement.render(binding));
                            }
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_flattened,
    bench_parse_envelope,
    bench_parse_and_render
);
criterion_main!(benches);
