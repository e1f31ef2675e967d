use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use stream_fold::aggregate::{aggregate, Aggregator};
use stream_fold::protocol::Dialect;
use stream_fold::stream::split_frames;

fn responses_stream(deltas: usize) -> String {
    let mut out = String::new();
    let mut push = |event: serde_json::Value| {
        let name = event["type"].as_str().unwrap_or("message").to_owned();
        out.push_str(&format!("event: {name}\ndata: {event}\n\n"));
    };
    push(json!({"type": "response.created", "response": {"id": "resp_b", "status": "in_progress", "output": []}}));
    push(json!({"type": "response.output_item.added", "output_index": 0,
        "item": {"id": "msg_b", "type": "message", "role": "assistant", "content": []}}));
    for i in 0..deltas {
        push(json!({"type": "response.output_text.delta", "item_id": "msg_b", "output_index": 0,
            "content_index": 0, "delta": format!("token{i} ")}));
    }
    push(json!({"type": "response.completed", "response": {"id": "resp_b", "status": "completed", "output": []}}));
    out
}

fn chat_stream(deltas: usize) -> String {
    let mut out = String::new();
    for i in 0..deltas {
        let chunk = json!({"id": "c", "object": "chat.completion.chunk", "model": "m",
            "choices": [{"index": 0, "delta": {"content": format!("token{i} ")}}]});
        out.push_str(&format!("data: {chunk}\n\n"));
    }
    out.push_str("data: [DONE]\n\n");
    out
}

fn anthropic_tool_stream(deltas: usize) -> String {
    let mut out = String::from(
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t\",\"name\":\"f\",\"input\":{}}}\n\n",
    );
    out.push_str("event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"items\\\":[\"}}\n\n");
    for i in 0..deltas {
        let sep = if i == 0 { "" } else { "," };
        let delta = json!({"type": "content_block_delta", "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": format!("{sep}{i}")}});
        out.push_str(&format!("event: content_block_delta\ndata: {delta}\n\n"));
    }
    out.push_str("event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"]}\"}}\n\n");
    out
}

fn bench_split_frames(c: &mut Criterion) {
    let raw = responses_stream(1000);
    c.bench_function("split_frames_responses_1k", |b| {
        b.iter(|| black_box(split_frames(black_box(&raw)).count()));
    });
}

fn bench_aggregate_buffered(c: &mut Criterion) {
    let responses = responses_stream(1000);
    let chat = chat_stream(1000);
    let anthropic = anthropic_tool_stream(1000);

    c.bench_function("aggregate_responses_text_1k", |b| {
        b.iter(|| black_box(aggregate(Dialect::OpenAiResponses, black_box(&responses))));
    });
    c.bench_function("aggregate_chat_text_1k", |b| {
        b.iter(|| black_box(aggregate(Dialect::OpenAiChat, black_box(&chat))));
    });
    c.bench_function("aggregate_anthropic_tool_input_1k", |b| {
        b.iter(|| black_box(aggregate(Dialect::Anthropic, black_box(&anthropic))));
    });
}

fn bench_aggregate_incremental(c: &mut Criterion) {
    let raw = responses_stream(1000);
    let chunks: Vec<&str> = raw
        .as_bytes()
        .chunks(512)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect();

    c.bench_function("aggregate_responses_incremental_512b_chunks", |b| {
        b.iter(|| {
            let mut aggregator = Aggregator::new(Dialect::OpenAiResponses);
            for chunk in &chunks {
                aggregator.feed(black_box(chunk));
            }
            black_box(aggregator.finish())
        });
    });
}

criterion_group!(
    benches,
    bench_split_frames,
    bench_aggregate_buffered,
    bench_aggregate_incremental
);
criterion_main!(benches);
