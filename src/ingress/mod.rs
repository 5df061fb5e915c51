//! Ingress loader (§4.10): a reader thread splits a file into 500_000-line
//! buffers, a fixed-size `rayon` pool parses each buffer's lines with the
//! format's parser, and every worker's parsed edges are flushed in one shot
//! through `GraphClient::add_edges`. Grounded on the teacher's existing
//! `rayon` dependency for exactly this kind of bounded parallel worker
//! fan-out.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;

use crate::client::GraphClient;
use crate::error::{DbError, DbResult};
use crate::ids::VertexId;
use crate::row::Row;

const BUFFER_LINES: usize = 500_000;
const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Snap,
    Tsv,
    Adj,
}

impl Format {
    pub fn parse_name(name: &str) -> DbResult<Self> {
        match name {
            "snap" => Ok(Format::Snap),
            "tsv" => Ok(Format::Tsv),
            "adj" => Ok(Format::Adj),
            other => Err(DbError::InvalidCommand(format!("unknown ingress format '{other}'"))),
        }
    }
}

/// One parsed edge; self-edges are dropped before this type is ever built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub src: VertexId,
    pub dst: VertexId,
}

/// Parses one line into zero or more edges (`adj` lines fan out to many;
/// a dropped self-edge or a comment/blank line yields none). Errors are
/// per-line and never abort the load — callers log and continue, per §4.7
/// "Propagation".
pub fn parse_line(format: Format, line: &str) -> DbResult<Vec<EdgeRecord>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }
    match format {
        Format::Snap if line.starts_with('#') => Ok(Vec::new()),
        Format::Snap | Format::Tsv => {
            let mut parts = line.split_whitespace();
            let src: VertexId = parts
                .next()
                .ok_or_else(|| DbError::InvalidCommand("missing source id".into()))?
                .parse()
                .map_err(|_| DbError::InvalidCommand(format!("bad source id in '{line}'")))?;
            let dst: VertexId = parts
                .next()
                .ok_or_else(|| DbError::InvalidCommand("missing destination id".into()))?
                .parse()
                .map_err(|_| DbError::InvalidCommand(format!("bad destination id in '{line}'")))?;
            Ok(drop_self_edge(src, dst))
        }
        Format::Adj => {
            let tokens: Vec<&str> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .collect();
            if tokens.len() < 2 {
                return Err(DbError::InvalidCommand(format!("malformed adj line '{line}'")));
            }
            let src: VertexId = tokens[0]
                .parse()
                .map_err(|_| DbError::InvalidCommand(format!("bad source id in '{line}'")))?;
            let cnt: usize = tokens[1]
                .parse()
                .map_err(|_| DbError::InvalidCommand(format!("bad count in '{line}'")))?;
            let targets = &tokens[2..];
            if targets.len() != cnt {
                return Err(DbError::InvalidCommand(format!(
                    "adj line declares {cnt} targets but lists {}",
                    targets.len()
                )));
            }
            let mut out = Vec::with_capacity(targets.len());
            for t in targets {
                let dst: VertexId = t
                    .parse()
                    .map_err(|_| DbError::InvalidCommand(format!("bad target id '{t}'")))?;
                out.extend(drop_self_edge(src, dst));
            }
            Ok(out)
        }
    }
}

fn drop_self_edge(src: VertexId, dst: VertexId) -> Vec<EdgeRecord> {
    if src == dst {
        Vec::new()
    } else {
        vec![EdgeRecord { src, dst }]
    }
}

pub struct Loader {
    pool: rayon::ThreadPool,
}

impl Loader {
    pub fn new(workers: usize) -> DbResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| DbError::InvalidCommand(format!("failed to build worker pool: {e}")))?;
        Ok(Loader { pool })
    }

    pub fn with_default_workers() -> DbResult<Self> {
        Self::new(DEFAULT_WORKERS)
    }

    /// Streams `path` through the reader thread, handing 500_000-line
    /// buffers to the worker pool; each worker parses its buffer, then the
    /// parsed edges are handed to `client.add_edges` as one batch, which
    /// groups them by destination shard and emits one RPC per non-empty
    /// shard (§4.9, dataflow in §1). Returns the number of edges loaded and
    /// the number of lines/items that failed to parse or were rejected.
    pub async fn load_file(
        &self,
        path: impl AsRef<Path>,
        format: Format,
        gzip: bool,
        client: Arc<GraphClient>,
    ) -> DbResult<(u64, u64)> {
        let path = path.as_ref().to_path_buf();
        let buffers = Self::read_buffers(&path, gzip)?;

        let results: Vec<(Vec<EdgeRecord>, u64)> = self.pool.install(|| {
            use rayon::prelude::*;
            buffers
                .into_par_iter()
                .map(|buf| {
                    let mut edges = Vec::new();
                    let mut errors = 0u64;
                    for line in buf {
                        match parse_line(format, &line) {
                            Ok(mut parsed) => edges.append(&mut parsed),
                            Err(e) => {
                                tracing::warn!(line = %line, error = %e, "ingress: dropping malformed line");
                                errors += 1;
                            }
                        }
                    }
                    (edges, errors)
                })
                .collect()
        });

        let mut loaded = 0u64;
        let mut errors = 0u64;
        for (edges, err_count) in results {
            errors += err_count;
            if edges.is_empty() {
                continue;
            }
            let batch: Vec<(VertexId, VertexId, Row)> = edges
                .into_iter()
                .map(|e| (e.src, e.dst, Row::empty(&crate::row::Schema::new(), false)))
                .collect();
            for outcome in client.add_edges(batch).await? {
                match outcome {
                    Ok(_) => loaded += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, "ingress: rejected edge in batch");
                        errors += 1;
                    }
                }
            }
        }
        Ok((loaded, errors))
    }

    fn read_buffers(path: &Path, gzip: bool) -> DbResult<Vec<Vec<String>>> {
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if gzip {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let reader = BufReader::new(reader);

        let mut buffers = Vec::new();
        let mut current = Vec::with_capacity(BUFFER_LINES);
        for line in reader.lines() {
            let line = line?;
            current.push(line);
            if current.len() >= BUFFER_LINES {
                buffers.push(std::mem::replace(&mut current, Vec::with_capacity(BUFFER_LINES)));
            }
        }
        if !current.is_empty() {
            buffers.push(current);
        }
        Ok(buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_format_ignores_comments() {
        assert_eq!(parse_line(Format::Snap, "# a comment").unwrap(), Vec::new());
    }

    #[test]
    fn snap_format_parses_two_ids() {
        let edges = parse_line(Format::Snap, "1 2").unwrap();
        assert_eq!(edges, vec![EdgeRecord { src: 1, dst: 2 }]);
    }

    #[test]
    fn tsv_format_has_no_comment_handling() {
        assert!(parse_line(Format::Tsv, "# 1 2").is_err());
    }

    #[test]
    fn self_edges_are_dropped() {
        assert!(parse_line(Format::Snap, "5 5").unwrap().is_empty());
    }

    #[test]
    fn adj_format_fans_out_to_each_target() {
        let edges = parse_line(Format::Adj, "1,2,2,3").unwrap();
        assert_eq!(
            edges,
            vec![EdgeRecord { src: 1, dst: 2 }, EdgeRecord { src: 1, dst: 3 }]
        );
    }

    #[test]
    fn adj_format_rejects_count_mismatch() {
        assert!(parse_line(Format::Adj, "1,3,2,3").is_err());
    }

    #[test]
    fn blank_lines_produce_no_edges() {
        assert!(parse_line(Format::Snap, "   ").unwrap().is_empty());
    }

    #[test]
    fn unknown_format_name_is_rejected() {
        assert!(Format::parse_name("csv").is_err());
    }
}
