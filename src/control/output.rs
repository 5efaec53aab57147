//! Output streams: selected fields written every N steps as JSON lines.

use crate::atm_error::AtmError;
use crate::config::{OutputManagerParams, StreamParams};
use crate::field::layout::LayoutType;
use crate::field::repository::{FieldHandle, FieldRepository};
use crate::physics::transpose::{TransposeDirection, transpose};
use crate::time_stamp::TimeStamp;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::io::Write;
use std::sync::Arc;

/// Sink for output records.
pub trait OutputWriter: Send {
    fn write_record(&mut self, record: &Value) -> Result<(), AtmError>;
    fn flush(&mut self) -> Result<(), AtmError> {
        Ok(())
    }
}

/// One JSON document per line.
pub struct JsonLinesWriter<W: Write + Send> {
    inner: W,
}

impl<W: Write + Send> JsonLinesWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write + Send> OutputWriter for JsonLinesWriter<W> {
    fn write_record(&mut self, record: &Value) -> Result<(), AtmError> {
        serde_json::to_writer(&mut self.inner, record)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AtmError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Keeps records in memory; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryWriter {
    records: Arc<Mutex<Vec<Value>>>,
}

impl MemoryWriter {
    pub fn records(&self) -> Vec<Value> {
        self.records.lock().clone()
    }
}

impl OutputWriter for MemoryWriter {
    fn write_record(&mut self, record: &Value) -> Result<(), AtmError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

struct StreamField {
    name: String,
    handle: FieldHandle,
    /// `(ncol, nlev)` when the field is written level-major.
    transposed: Option<(usize, usize)>,
}

struct OutputStream {
    name: String,
    fields: Vec<StreamField>,
    frequency: usize,
    steps: usize,
    writer: Box<dyn OutputWriter>,
}

#[derive(Default)]
pub struct OutputManager {
    streams: Vec<OutputStream>,
}

impl OutputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build streams from parameters. Streams without a `path` write to
    /// memory.
    pub fn from_params(params: &OutputManagerParams, repo: &FieldRepository) -> Result<Self, AtmError> {
        let mut om = Self::new();
        for sp in &params.streams {
            let writer: Box<dyn OutputWriter> = match &sp.path {
                Some(path) => {
                    let file = std::fs::File::create(path).map_err(|e| AtmError::Output {
                        stream: sp.name.clone(),
                        reason: format!("cannot create {}: {e}", path.display()),
                    })?;
                    Box::new(JsonLinesWriter::new(std::io::BufWriter::new(file)))
                }
                None => Box::new(MemoryWriter::default()),
            };
            om.add_stream(sp, writer, repo)?;
        }
        Ok(om)
    }

    pub fn add_stream(
        &mut self,
        params: &StreamParams,
        writer: Box<dyn OutputWriter>,
        repo: &FieldRepository,
    ) -> Result<(), AtmError> {
        if params.frequency == 0 {
            return Err(AtmError::Output {
                stream: params.name.clone(),
                reason: "frequency must be at least 1".into(),
            });
        }
        let fields = params
            .fields
            .iter()
            .map(|f| {
                let handle = repo.get_field(f, &params.grid)?;
                let layout = repo.identifier(handle)?.layout();
                let transposed = (params.level_major && layout.layout_type() == LayoutType::Scalar3D)
                    .then(|| (layout.dim(0), layout.dim(1)));
                Ok(StreamField {
                    name: f.clone(),
                    handle,
                    transposed,
                })
            })
            .collect::<Result<Vec<_>, AtmError>>()?;
        self.streams.push(OutputStream {
            name: params.name.clone(),
            fields,
            frequency: params.frequency,
            steps: 0,
            writer,
        });
        Ok(())
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    /// Write the initial state of every stream.
    pub fn write_initial(&mut self, repo: &FieldRepository, ts: TimeStamp) -> Result<(), AtmError> {
        for s in &mut self.streams {
            Self::write(s, repo, ts)?;
        }
        Ok(())
    }

    /// Count one step; write streams that are due.
    pub fn run(&mut self, repo: &FieldRepository, ts: TimeStamp) -> Result<(), AtmError> {
        for s in &mut self.streams {
            s.steps += 1;
            if s.steps % s.frequency == 0 {
                Self::write(s, repo, ts)?;
            }
        }
        Ok(())
    }

    fn write(s: &mut OutputStream, repo: &FieldRepository, ts: TimeStamp) -> Result<(), AtmError> {
        let mut values = Map::new();
        for f in &s.fields {
            let data = repo.read(f.handle)?;
            let data = match f.transposed {
                Some((ncol, nlev)) => {
                    let mut out = vec![0.0; data.len()];
                    transpose(TransposeDirection::CToF, &data, &mut out, ncol, nlev);
                    out
                }
                None => data,
            };
            values.insert(f.name.clone(), Value::from(data));
        }
        let record = json!({
            "stream": s.name,
            "time": ts.to_string(),
            "step": s.steps,
            "fields": values,
        });
        s.writer.write_record(&record).map_err(|e| AtmError::Output {
            stream: s.name.clone(),
            reason: e.to_string(),
        })?;
        log::debug!("output stream `{}` wrote step {}", s.name, s.steps);
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<(), AtmError> {
        for s in &mut self.streams {
            s.writer.flush()?;
        }
        self.streams.clear();
        Ok(())
    }
}
