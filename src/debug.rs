//! Ambient debug tooling: dumps a compiled [`crate::compiler::Schedule`] to a JSON file for
//! offline inspection, the same role `context::frame`'s `dump_current_frame` played for the
//! teacher's per-frame pass list.
use crate::compiler::Schedule;
use crate::ir::Module;
use serde_json::json;
use std::fs::File;
use std::io;

/// Writes `schedule` to `<file_name_prefix>.json`, one entry per scheduled node: its name, kind,
/// recording order, stream assignment, and the order index of its last use.
pub fn dump_schedule(module: &Module, schedule: &Schedule, file_name_prefix: &str) -> io::Result<()> {
    let nodes_json: Vec<_> = schedule
        .order
        .iter()
        .map(|scheduled| {
            let node = module.node(scheduled.node);
            json!({
                "order": scheduled.order,
                "stream": format!("{:?}", scheduled.stream),
                "name": node.map(|n| n.name.as_str()).unwrap_or("<missing>"),
                "kind": node.map(|n| format!("{:?}", n.kind)).unwrap_or_default(),
                "lastUse": schedule.last_use.get(&scheduled.node),
            })
        })
        .collect();

    let document = json!({ "schedule": nodes_json });
    let file = File::create(format!("{}.json", file_name_prefix))?;
    serde_json::to_writer_pretty(file, &document)?;
    Ok(())
}
