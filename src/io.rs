//! Interchange formats at the system boundary. Every reader normalizes ids
//! once, here, so the core only ever sees dense indices.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::candidates::CandidateSet;
use crate::error::{RecError, Result};
use crate::features::{FeatureRow, FeatureTable};
use crate::ids::{ExternalId, IdMap};
use crate::interactions::RawInteraction;
use crate::recommendations::Recommendations;
use crate::split::HeldOut;

#[derive(Debug, Serialize, Deserialize)]
struct InteractionRecord {
    user_id: String,
    item_id: String,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    weight: Option<f32>,
}

/// `{n_users, n_items, K}` summary written next to the held-out file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub n_users: usize,
    pub n_items: usize,
    #[serde(rename = "K")]
    pub k: usize,
}

/// Read `user_id,item_id[,timestamp][,weight]`; weight defaults to 1.
pub fn read_interactions<R: Read>(reader: R) -> Result<Vec<RawInteraction>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut raw = Vec::new();
    for record in csv_reader.deserialize() {
        let record: InteractionRecord = record?;
        raw.push(RawInteraction::new(
            ExternalId::parse(&record.user_id),
            ExternalId::parse(&record.item_id),
            record.timestamp,
            record.weight.unwrap_or(1.0),
        ));
    }
    if raw.is_empty() {
        return Err(RecError::EmptyInput);
    }
    tracing::info!("read {} interactions", raw.len());
    Ok(raw)
}

pub fn read_interactions_path(path: impl AsRef<Path>) -> Result<Vec<RawInteraction>> {
    read_interactions(BufReader::new(File::open(path)?))
}

pub fn write_interactions<W: Write>(writer: W, raw: &[RawInteraction]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for r in raw {
        csv_writer.serialize(InteractionRecord {
            user_id: r.user_id.to_string(),
            item_id: r.item_id.to_string(),
            timestamp: r.timestamp,
            weight: Some(r.weight),
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize, W: Write>(writer: W, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned, R: Read>(reader: R) -> Result<T> {
    Ok(serde_json::from_reader(BufReader::new(reader))?)
}

/// One list of item indices per user, possibly empty.
pub fn write_held_out<W: Write>(writer: W, held_out: &HeldOut) -> Result<()> {
    write_json(writer, held_out)
}

pub fn read_held_out<R: Read>(reader: R) -> Result<HeldOut> {
    read_json(reader)
}

pub fn write_metadata<W: Write>(writer: W, metadata: &Metadata) -> Result<()> {
    write_json(writer, metadata)
}

pub fn read_metadata<R: Read>(reader: R) -> Result<Metadata> {
    read_json(reader)
}

pub fn write_recommendations<W: Write>(writer: W, recs: &Recommendations) -> Result<()> {
    write_json(writer, recs)
}

pub fn read_recommendations<R: Read>(reader: R) -> Result<Recommendations> {
    read_json(reader)
}

/// Candidate file: external key (as a string) -> external item ids.
pub fn write_candidates<W: Write>(
    writer: W,
    candidates: &CandidateSet,
    keys: &IdMap,
    items: &IdMap,
) -> Result<()> {
    let mut file: BTreeMap<String, Vec<&ExternalId>> = BTreeMap::new();
    for (key, list) in candidates.iter() {
        if let Some(key_id) = keys.id(key) {
            let ids = list.iter().filter_map(|&i| items.id(i)).collect();
            file.insert(key_id.to_string(), ids);
        }
    }
    write_json(writer, &file)
}

/// Load a candidate file and resolve keys and items to dense indices.
///
/// Keys and values may have been written as integers or as strings; both
/// forms resolve to the same index. Entries that still do not resolve are
/// dropped and reported, never silently turned into empty lists.
pub fn read_candidates<R: Read>(reader: R, keys: &IdMap, items: &IdMap) -> Result<CandidateSet> {
    let file: BTreeMap<String, Vec<ExternalId>> = read_json(reader)?;
    let mut lists: Vec<Vec<u32>> = vec![Vec::new(); keys.len()];
    let mut unresolved_keys = 0usize;
    let mut unresolved_items = 0usize;

    for (raw_key, raw_items) in file {
        let Some(key) = keys.resolve(&ExternalId::parse(&raw_key)) else {
            unresolved_keys += 1;
            continue;
        };
        let list = &mut lists[key as usize];
        for id in raw_items {
            match items.resolve(&id) {
                Some(i) if !list.contains(&i) => list.push(i),
                Some(_) => {}
                None => unresolved_items += 1,
            }
        }
    }

    if unresolved_keys > 0 || unresolved_items > 0 {
        tracing::warn!(
            unresolved_keys,
            unresolved_items,
            "candidate file references ids outside the mapping"
        );
    }
    Ok(CandidateSet::new(lists))
}

/// Columns `user_id,item_id,item_pop,is_recent,label`, ids as dense indices.
pub fn write_features<W: Write>(writer: W, table: &FeatureTable) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in table.rows() {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn read_features<R: Read>(reader: R) -> Result<FeatureTable> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let rows = csv_reader
        .deserialize::<FeatureRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(FeatureTable::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_interactions_optional_columns() -> Result<()> {
        let data = "user_id,item_id\n1,10\nalice,20\n";
        let raw = read_interactions(data.as_bytes())?;
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].user_id, ExternalId::Int(1));
        assert_eq!(raw[1].user_id, ExternalId::Str("alice".into()));
        assert_eq!(raw[0].timestamp, None);
        assert_eq!(raw[0].weight, 1.0);

        let data = "user_id,item_id,timestamp,weight\n1,10,1700000000,2.5\n2,11,,\n";
        let raw = read_interactions(data.as_bytes())?;
        assert_eq!(raw[0].timestamp, Some(1_700_000_000));
        assert_eq!(raw[0].weight, 2.5);
        assert_eq!(raw[1].timestamp, None);
        assert_eq!(raw[1].weight, 1.0);
        Ok(())
    }

    #[test]
    fn test_zero_padded_ids_are_not_merged() -> Result<()> {
        let raw = read_interactions("user_id,item_id\n007,a\n7,b\n".as_bytes())?;
        let (users, items) = crate::ids::build_mappings(&raw)?;
        assert_eq!(users.len(), 2);
        assert_eq!(users.ids(), &[ExternalId::Int(7), ExternalId::Str("007".into())]);
        assert_eq!(items.len(), 2);
        Ok(())
    }

    #[test]
    fn test_read_interactions_empty() {
        let result = read_interactions("user_id,item_id\n".as_bytes());
        assert!(matches!(result, Err(RecError::EmptyInput)));
    }

    #[test]
    fn test_interactions_roundtrip_through_csv() -> Result<()> {
        let raw = vec![RawInteraction::new(3.into(), "x".into(), Some(5), 1.0)];
        let mut buf = Vec::new();
        write_interactions(&mut buf, &raw)?;
        assert_eq!(read_interactions(buf.as_slice())?, raw);
        Ok(())
    }

    #[test]
    fn test_held_out_and_metadata_format() -> Result<()> {
        let held = HeldOut::new(vec![vec![2], vec![], vec![1]]);
        let mut buf = Vec::new();
        write_held_out(&mut buf, &held)?;
        assert_eq!(String::from_utf8_lossy(&buf), "[[2],[],[1]]");
        assert_eq!(read_held_out(buf.as_slice())?, held);

        let meta = Metadata {
            n_users: 3,
            n_items: 4,
            k: 10,
        };
        let mut buf = Vec::new();
        write_metadata(&mut buf, &meta)?;
        assert_eq!(String::from_utf8_lossy(&buf), r#"{"n_users":3,"n_items":4,"K":10}"#);
        assert_eq!(read_metadata(buf.as_slice())?, meta);
        Ok(())
    }

    #[test]
    fn test_read_candidates_mixed_key_types() -> Result<()> {
        let keys = IdMap::from_ids(vec![ExternalId::Int(1), ExternalId::Int(2), "c".into()]);
        let items = IdMap::from_ids(vec![ExternalId::Int(10), ExternalId::Int(20)]);
        // numeric keys written as strings, items as ints or strings,
        // one unknown key and one unknown item
        let json = r#"{"1": [20, "10", 20], "2": ["99"], "c": [10], "zzz": [10]}"#;
        let set = read_candidates(json.as_bytes(), &keys, &items)?;
        assert_eq!(set.get(0), &[1, 0]);
        assert!(set.get(1).is_empty());
        assert_eq!(set.get(2), &[0]);
        Ok(())
    }

    #[test]
    fn test_candidates_write_then_read() -> Result<()> {
        let keys = IdMap::from_ids(vec![ExternalId::Int(7), ExternalId::Int(8)]);
        let items = IdMap::from_ids(vec!["a".into(), "b".into()]);
        let set = CandidateSet::new(vec![vec![1, 0], vec![]]);
        let mut buf = Vec::new();
        write_candidates(&mut buf, &set, &keys, &items)?;
        assert_eq!(String::from_utf8_lossy(&buf), r#"{"7":["b","a"],"8":[]}"#);
        assert_eq!(read_candidates(buf.as_slice(), &keys, &items)?, set);
        Ok(())
    }

    #[test]
    fn test_features_csv() -> Result<()> {
        let table = FeatureTable::new(vec![FeatureRow {
            user_id: 0,
            item_id: 3,
            item_pop: 12,
            is_recent: 1,
            label: 0,
        }]);
        let mut buf = Vec::new();
        write_features(&mut buf, &table)?;
        assert_eq!(
            String::from_utf8_lossy(&buf),
            "user_id,item_id,item_pop,is_recent,label\n0,3,12,1,0\n"
        );
        assert_eq!(read_features(buf.as_slice())?, table);
        Ok(())
    }
}
