/// TokenBudget Performance Benchmarks using Criterion
///
/// Run with: cargo bench --bench token_budget_benchmark
///
/// Benchmarks cover:
/// - Counting a long history
/// - Trimming histories of growing length
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tiny_agents_core::{ConversationHistory, Message, TokenBudget, ToolCall};

fn make_history(turns: usize) -> ConversationHistory {
    let mut history = ConversationHistory::new("You are a helpful assistant with tools.");
    for i in 0..turns {
        history.push_user(format!("question {}: {}", i, "compute something ".repeat(12)));
        let call = ToolCall::new(format!("call_{}", i), "execute_python", r#"{"code": "print(1)"}"#);
        history
            .push_round(
                Message::assistant_with_tools(None, vec![call.clone()]),
                vec![Message::tool_result(&call, "output line\n".repeat(20))],
            )
            .expect("round is well formed");
        history.push_assistant(format!("answer {}: {}", i, "the result is ".repeat(10)));
    }
    history.push_user("latest question");
    history
}

fn bench_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_budget_count");
    let budget = TokenBudget::for_model("gpt-4.1");

    for turns in [10, 100, 1_000].iter() {
        let history = make_history(*turns);
        group.throughput(Throughput::Elements(history.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(turns), &history, |b, history| {
            b.iter(|| black_box(budget.count(history.messages())));
        });
    }

    group.finish();
}

fn bench_trim(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_budget_trim");
    let budget = TokenBudget::for_model("gpt-4.1");

    for turns in [10, 100, 1_000].iter() {
        let history = make_history(*turns);
        group.bench_with_input(BenchmarkId::from_parameter(turns), &history, |b, history| {
            b.iter(|| black_box(budget.trim(history.messages(), 16_000)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_count, bench_trim);
criterion_main!(benches);
