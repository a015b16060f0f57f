//! Pipeline execution throughput benchmark.
//!
//! Measures `Runtime::run`/`run_parallel` latency across a range of stage
//! counts using Criterion.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio_util::sync::CancellationToken;

use pipeline_runtime::config::{AgentConfig, PipelineConfig, RunMode};
use pipeline_runtime::{Envelope, Runtime, StageContext, StageExecutor};

struct Forward;

#[async_trait]
impl StageExecutor for Forward {
    async fn process(
        &self,
        ctx: &StageContext,
        envelope: &mut Envelope,
    ) -> pipeline_runtime::Result<()> {
        envelope.set_output(
            ctx.stage(),
            HashMap::from([("ran".to_string(), serde_json::Value::Bool(true))]),
        );
        Ok(())
    }
}

fn linear_runtime(stage_count: usize) -> Runtime {
    let agents: Vec<AgentConfig> = (0..stage_count)
        .map(|i| {
            let name = format!("s{i}");
            let mut agent = AgentConfig::new(name.clone(), i as i32);
            if i + 1 < stage_count {
                agent = agent.with_default_next(format!("s{}", i + 1));
            }
            agent
        })
        .collect();

    let mut config = PipelineConfig::new("bench-linear", agents);
    config.max_agent_hops = (stage_count as u32) + 1;
    config.max_iterations = 1;

    let mut executors: HashMap<String, Arc<dyn StageExecutor>> = HashMap::new();
    for i in 0..stage_count {
        executors.insert(format!("s{i}"), Arc::new(Forward));
    }
    Runtime::new(config, executors).unwrap()
}

fn diamond_batch_runtime(width: usize) -> Runtime {
    let mut agents = vec![AgentConfig::new("source", 0)];
    for i in 0..width {
        agents.push(AgentConfig::new(format!("mid{i}"), (i + 1) as i32).requiring(["source"]));
    }
    let sink_requires: Vec<String> = (0..width).map(|i| format!("mid{i}")).collect();
    agents.push(AgentConfig::new("sink", (width + 1) as i32).requiring(sink_requires));

    let mut config = PipelineConfig::new("bench-diamond", agents);
    config.enable_dag_execution = true;
    config.default_run_mode = RunMode::Parallel;
    config.max_agent_hops = (width as u32) + 2;
    config.max_iterations = 1;

    let mut executors: HashMap<String, Arc<dyn StageExecutor>> = HashMap::new();
    executors.insert("source".to_string(), Arc::new(Forward));
    executors.insert("sink".to_string(), Arc::new(Forward));
    for i in 0..width {
        executors.insert(format!("mid{i}"), Arc::new(Forward));
    }
    Runtime::new(config, executors).unwrap()
}

fn bench_sequential_linear(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("sequential_linear");
    for &stage_count in &[1usize, 4, 16, 64] {
        let runtime = linear_runtime(stage_count);
        group.bench_with_input(BenchmarkId::from_parameter(stage_count), &runtime, |b, runtime| {
            b.iter(|| {
                rt.block_on(async {
                    let mut envelope = Envelope::new();
                    runtime
                        .run(black_box(&mut envelope), None, CancellationToken::new())
                        .await
                        .unwrap();
                    envelope
                })
            });
        });
    }
    group.finish();
}

fn bench_parallel_diamond(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("parallel_diamond");
    for &width in &[1usize, 4, 16] {
        let runtime = diamond_batch_runtime(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &runtime, |b, runtime| {
            b.iter(|| {
                rt.block_on(async {
                    let mut envelope = Envelope::new();
                    runtime
                        .run_parallel(black_box(&mut envelope), None, CancellationToken::new())
                        .await
                        .unwrap();
                    envelope
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sequential_linear, bench_parallel_diamond);
criterion_main!(benches);
