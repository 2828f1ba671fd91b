//! Database and table descriptors.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether a table is replicated whole or spatially partitioned into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    /// A regular, non-chunked table.
    Regular,
    /// A chunked table, replicated to whichever workers hold the relevant chunks.
    Partitioned,
}

/// One table within a [`DatabaseInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    /// The base (prototype) table name.
    pub name: String,
    /// Regular or partitioned.
    pub kind: TableKind,
    /// Whether this is the database's director table (has a central index).
    pub is_director: bool,
    /// Primary-key column name, required when `is_director` is set.
    pub director_key: Option<String>,
    /// Once set, the table's schema/content is frozen.
    pub is_published: bool,
}

impl TableInfo {
    /// A plain, non-director, unpublished regular table.
    pub fn regular(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Regular,
            is_director: false,
            director_key: None,
            is_published: false,
        }
    }

    /// An unpublished partitioned table, optionally a director.
    pub fn partitioned(name: impl Into<String>, director_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Partitioned,
            is_director: director_key.is_some(),
            director_key,
            is_published: false,
        }
    }
}

/// The catalog's record of one database. Published databases cannot accept further ingest
/// except via administrative override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Unique database name.
    pub name: String,
    /// Family name, used for replica grouping.
    pub family: String,
    /// Whether the database as a whole is published.
    pub is_published: bool,
    /// Whether `begin()` should automatically maintain the director index for this database.
    pub auto_build_director_index: bool,
    /// Tables keyed by name.
    pub tables: BTreeMap<String, TableInfo>,
    /// Worker names this database's chunks may be allocated to.
    pub workers: BTreeSet<String>,
}

impl DatabaseInfo {
    /// A fresh, unpublished database with no tables.
    pub fn new(name: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family: family.into(),
            is_published: false,
            auto_build_director_index: false,
            tables: BTreeMap::new(),
            workers: BTreeSet::new(),
        }
    }

    /// All partitioned tables that are not yet published.
    pub fn unpublished_partitioned_tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables
            .values()
            .filter(|t| matches!(t.kind, TableKind::Partitioned) && !t.is_published)
    }

    /// All unpublished tables, regular and partitioned.
    pub fn unpublished_tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values().filter(|t| !t.is_published)
    }

    /// Director tables that are not yet published, used by the begin/end transaction protocol
    /// when `auto_build_director_index` is set.
    pub fn unpublished_director_tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.unpublished_partitioned_tables().filter(|t| t.is_director)
    }

    /// The name of the central director-index table for `director_table`: `<db>__<director>`.
    pub fn director_index_table_name(&self, director_table: &str) -> String {
        format!("{}__{}", self.name, director_table)
    }
}
