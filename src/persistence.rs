//! Stream (de)serialization of the graph structure.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Header string "HNSW" (u32 length + bytes)│
//! │ Format version (u32)                     │
//! ├─────────────────────────────────────────┤
//! │ Parameters block: u32 length + JSON      │
//! ├─────────────────────────────────────────┤
//! │ Core block:                              │
//! │   node count (u32)                       │
//! │   per node: id, max_layer,               │
//! │     out-edges per layer (u32 len + ids), │
//! │     in-edges per layer (u32 len + ids)   │
//! │   removed ids (u32 count + ids)          │
//! │   entry point (u8 flag + u32)            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Items are not serialized — the caller
//! re-supplies the items list and it is bound to ids by position.
//! Compatibility breaks require a new format version; an unrecognized
//! header rewinds seekable streams to where they started.

use std::collections::BTreeSet;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Result, SmallWorldError};
use crate::graph::core::{DistanceFn, GraphCore};
use crate::graph::node::{NeighborList, Node};
use crate::params::Parameters;

const HEADER: &[u8] = b"HNSW";
const FORMAT_VERSION: u32 = 1;

fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_id_list<W: Write>(writer: &mut W, ids: &[u32]) -> Result<()> {
    write_u32(writer, ids.len() as u32)?;
    for &id in ids {
        write_u32(writer, id)?;
    }
    Ok(())
}

fn read_id_list<R: Read>(reader: &mut R) -> Result<NeighborList> {
    let len = read_u32(reader)? as usize;
    let mut ids = NeighborList::new();
    for _ in 0..len {
        ids.push(read_u32(reader)?);
    }
    Ok(ids)
}

/// Write the edge structure of `core` to `writer`.
pub(crate) fn write_graph<T, D, W>(core: &GraphCore<T, D>, writer: &mut W) -> Result<()>
where
    D: PartialOrd + Copy,
    W: Write,
{
    write_u32(writer, HEADER.len() as u32)?;
    writer.write_all(HEADER)?;
    write_u32(writer, FORMAT_VERSION)?;

    let params = serde_json::to_vec(&core.params)
        .map_err(|e| SmallWorldError::InvalidData(format!("unencodable parameters: {e}")))?;
    write_u32(writer, params.len() as u32)?;
    writer.write_all(&params)?;

    write_u32(writer, core.nodes.len() as u32)?;
    for node in &core.nodes {
        write_u32(writer, node.id)?;
        write_u32(writer, node.max_layer as u32)?;
        for layer in 0..=node.max_layer {
            write_id_list(writer, &node.connections[layer])?;
        }
        for layer in 0..=node.max_layer {
            write_id_list(writer, &node.in_connections[layer])?;
        }
    }

    write_u32(writer, core.removed.len() as u32)?;
    for &id in &core.removed {
        write_u32(writer, id)?;
    }

    match core.entry_point {
        Some(entry) => {
            writer.write_all(&[1])?;
            write_u32(writer, entry)?;
        }
        None => writer.write_all(&[0])?,
    }
    Ok(())
}

/// Read a graph from `reader` and bind `items` to its ids by position.
///
/// The reconstructed graph is validated structurally before it is returned;
/// a stream that decodes but describes an inconsistent graph is rejected.
pub(crate) fn read_graph<T, D, R>(
    items: Vec<T>,
    distance: DistanceFn<T, D>,
    reader: &mut R,
) -> Result<GraphCore<T, D>>
where
    D: PartialOrd + Copy,
    R: Read + Seek,
{
    let start = reader.stream_position()?;

    let rewind_invalid = |reader: &mut R, msg: String| -> SmallWorldError {
        // Best effort: leave a seekable stream where it started.
        let _ = reader.seek(SeekFrom::Start(start));
        SmallWorldError::InvalidData(msg)
    };

    let header_len = read_u32(reader)? as usize;
    if header_len != HEADER.len() {
        return Err(rewind_invalid(reader, "unrecognized header".to_string()));
    }
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    if header != *HEADER {
        return Err(rewind_invalid(reader, "unrecognized header".to_string()));
    }
    let version = read_u32(reader)?;
    if version != FORMAT_VERSION {
        return Err(rewind_invalid(
            reader,
            format!("unsupported format version {version}"),
        ));
    }

    let params_len = read_u32(reader)? as usize;
    let mut params_buf = vec![0u8; params_len];
    reader.read_exact(&mut params_buf)?;
    let params: Parameters = serde_json::from_slice(&params_buf)
        .map_err(|e| SmallWorldError::InvalidData(format!("undecodable parameters: {e}")))?;
    params.validate()?;

    let node_count = read_u32(reader)? as usize;
    if items.len() != node_count {
        return Err(SmallWorldError::InvalidData(format!(
            "{} items supplied for {node_count} serialized nodes",
            items.len()
        )));
    }

    let mut nodes = Vec::with_capacity(node_count);
    for expected in 0..node_count as u32 {
        let id = read_u32(reader)?;
        if id != expected {
            return Err(SmallWorldError::InvalidData(format!(
                "node record {expected} carries id {id}"
            )));
        }
        let max_layer = read_u32(reader)? as usize;
        let mut node = Node::new(id, max_layer);
        for layer in 0..=max_layer {
            node.connections[layer] = read_id_list(reader)?;
        }
        for layer in 0..=max_layer {
            node.in_connections[layer] = read_id_list(reader)?;
        }
        nodes.push(node);
    }

    let removed_count = read_u32(reader)? as usize;
    let mut removed = BTreeSet::new();
    for _ in 0..removed_count {
        let id = read_u32(reader)?;
        if id as usize >= node_count {
            return Err(SmallWorldError::InvalidData(format!(
                "removed id {id} outside the arena"
            )));
        }
        removed.insert(id);
    }

    let mut entry_flag = [0u8; 1];
    reader.read_exact(&mut entry_flag)?;
    let entry_point = match entry_flag[0] {
        0 => None,
        1 => {
            let entry = read_u32(reader)?;
            if entry as usize >= node_count {
                return Err(SmallWorldError::InvalidData(format!(
                    "entry point {entry} outside the arena"
                )));
            }
            Some(entry)
        }
        other => {
            return Err(SmallWorldError::InvalidData(format!(
                "invalid entry point flag {other}"
            )));
        }
    };

    let core = GraphCore::from_parts(params, distance, items, nodes, removed, entry_point);
    core.validate()?;
    Ok(core)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::GraphEngine;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Cursor;
    use std::sync::Arc;

    fn sample_engine() -> GraphEngine<f32, f32> {
        let params = Parameters {
            m: 4,
            construction_pruning: 16,
            ..Parameters::default()
        };
        let core: GraphCore<f32, f32> =
            GraphCore::new(params, Arc::new(|a: &f32, b: &f32| (a - b).abs()));
        let mut engine = GraphEngine::new(core, StdRng::seed_from_u64(21));
        for value in 0..32 {
            engine.insert(value as f32).unwrap();
        }
        engine.remove(5).unwrap();
        engine.remove(17).unwrap();
        engine
    }

    #[test]
    fn round_trip_preserves_structure() {
        let engine = sample_engine();
        let mut buffer = Vec::new();
        write_graph(&engine.core, &mut buffer).unwrap();

        let items: Vec<f32> = engine.core.items.clone();
        let distance: DistanceFn<f32, f32> = Arc::new(|a: &f32, b: &f32| (a - b).abs());
        let restored =
            read_graph(items, distance, &mut Cursor::new(buffer.clone())).unwrap();

        assert_eq!(restored.entry_point, engine.core.entry_point);
        assert_eq!(restored.removed, engine.core.removed);
        let mut again = Vec::new();
        write_graph(&restored, &mut again).unwrap();
        assert_eq!(again, buffer);
    }

    #[test]
    fn bad_header_rewinds_the_stream() {
        let engine = sample_engine();
        let mut buffer = Vec::new();
        write_graph(&engine.core, &mut buffer).unwrap();
        buffer[4] = b'X'; // corrupt the header string

        let distance: DistanceFn<f32, f32> = Arc::new(|a: &f32, b: &f32| (a - b).abs());
        let mut cursor = Cursor::new(buffer);
        let err = read_graph(engine.core.items.clone(), distance, &mut cursor).unwrap_err();
        assert!(matches!(err, SmallWorldError::InvalidData(_)));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn item_count_mismatch_is_rejected() {
        let engine = sample_engine();
        let mut buffer = Vec::new();
        write_graph(&engine.core, &mut buffer).unwrap();

        let distance: DistanceFn<f32, f32> = Arc::new(|a: &f32, b: &f32| (a - b).abs());
        let short: Vec<f32> = engine.core.items[..3].to_vec();
        let err = read_graph(short, distance, &mut Cursor::new(buffer)).unwrap_err();
        assert!(matches!(err, SmallWorldError::InvalidData(_)));
    }

    #[test]
    fn truncated_stream_surfaces_io_error() {
        let engine = sample_engine();
        let mut buffer = Vec::new();
        write_graph(&engine.core, &mut buffer).unwrap();
        buffer.truncate(buffer.len() / 2);

        let distance: DistanceFn<f32, f32> = Arc::new(|a: &f32, b: &f32| (a - b).abs());
        let err =
            read_graph(engine.core.items.clone(), distance, &mut Cursor::new(buffer)).unwrap_err();
        assert!(matches!(err, SmallWorldError::Io(_)));
    }

    #[test]
    fn empty_graph_round_trips() {
        let params = Parameters::default();
        let core: GraphCore<f32, f32> =
            GraphCore::new(params, Arc::new(|a: &f32, b: &f32| (a - b).abs()));
        let mut buffer = Vec::new();
        write_graph(&core, &mut buffer).unwrap();
        let distance: DistanceFn<f32, f32> = Arc::new(|a: &f32, b: &f32| (a - b).abs());
        let restored = read_graph(Vec::new(), distance, &mut Cursor::new(buffer)).unwrap();
        assert_eq!(restored.entry_point, None);
        assert!(restored.nodes.is_empty());
    }
}
