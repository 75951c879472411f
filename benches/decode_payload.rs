/// Benchmarks for gateway frame decoding, the per-message hot path of a session.
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use realtime_gateway_sdk::gateway::{Payload, decode};

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("gateway/decode");

    let frames = [
        (
            "HeartbeatAck",
            r#"{"op":11,"d":null}"#.to_owned(),
        ),
        (
            "MessageCreate",
            r#"{"op":0,"s":42,"t":"MESSAGE_CREATE","d":{
                "id":"334385199974967042","channel_id":"290926798999357250",
                "guild_id":"290926798626357250",
                "author":{"id":"53908099506183680","username":"Mason","discriminator":"9999","avatar":null},
                "content":"Supa Hot","timestamp":"2017-07-11T17:27:07.299000+00:00",
                "edited_timestamp":null,"tts":false,"mention_everyone":false,
                "mentions":[],"pinned":false,"type":0}}"#
                .to_owned(),
        ),
        (
            "PresenceUpdate",
            r#"{"op":0,"s":43,"t":"PRESENCE_UPDATE","d":{
                "user":{"id":"80351110224678912"},"guild_id":"290926798626357250",
                "status":"online","roles":[],"game":{"name":"chess","type":0}}}"#
                .to_owned(),
        ),
        ("GuildCreate", guild_create(250)),
    ];

    for (name, frame) in &frames {
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_function(*name, |b| {
            b.iter(|| {
                let payload: Payload = decode(std::hint::black_box(frame))
                    .expect("Decoding should succeed");
                std::hint::black_box(payload);
            });
        });
    }

    group.finish();
}

/// A `GUILD_CREATE` with `members` members and as many channels as a mid-sized guild.
fn guild_create(members: u64) -> String {
    let members: Vec<_> = (0..members)
        .map(|i| {
            serde_json::json!({
                "user": { "id": (1_000 + i).to_string(), "username": format!("user{i}"), "discriminator": "0001" },
                "roles": [],
                "joined_at": "2017-07-11T17:27:07.299000+00:00"
            })
        })
        .collect();
    let channels: Vec<_> = (0..40_u64)
        .map(|i| serde_json::json!({ "id": (5_000 + i).to_string(), "type": 0, "name": format!("channel-{i}") }))
        .collect();

    serde_json::json!({
        "op": 0, "s": 1, "t": "GUILD_CREATE",
        "d": { "id": "290926798626357250", "name": "bench", "members": members, "channels": channels }
    })
    .to_string()
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
