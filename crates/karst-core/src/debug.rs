// karst-core/src/debug.rs

#[cfg(feature = "batch-trace")]
pub fn dump_batch(label: &str, batch: karst_abi::BatchRef<'_>) {
    println!("[{label}] batch n_tokens={}", batch.len());
    for i in 0..batch.len() {
        println!(
            "[{label}]   #{i} token={} pos={} seq={} output={}",
            batch.token[i].0, batch.pos[i], batch.seq_id[i], batch.output[i]
        );
    }
}

#[cfg(feature = "kv-trace")]
pub fn trace_kv(op: &str, seq: karst_abi::SeqId, p0: karst_abi::Pos, p1: karst_abi::Pos, arg: karst_abi::Pos) {
    println!("[kv] {op} seq={seq} p0={p0} p1={p1} arg={arg}");
}

// no-op stubs when the features are off
#[cfg(not(feature = "batch-trace"))]
pub fn dump_batch(_label: &str, _batch: karst_abi::BatchRef<'_>) {}
#[cfg(not(feature = "kv-trace"))]
pub fn trace_kv(
    _op: &str,
    _seq: karst_abi::SeqId,
    _p0: karst_abi::Pos,
    _p1: karst_abi::Pos,
    _arg: karst_abi::Pos,
) {
}
