// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error};

use crate::errors::SinkError;
use crate::record::RecordKind;

/// Durable local copy of every record, independent of remote delivery.
///
/// Writes are fire-and-forget: implementations log their own failures.
pub trait LocalSink: Send + Sync {
    fn write(&self, kind: RecordKind, data: &[u8]);
}

struct OpenFile {
    day: NaiveDate,
    file: File,
}

/// Appends records, one per line, to `<dir>/<kind>-<YYYY-MM-DD>.txt`. Files are opened on
/// the first write of each kind and reopened when the UTC date changes.
pub struct DailyFileSink {
    dir: PathBuf,
    files: Mutex<HashMap<RecordKind, OpenFile>>,
}

impl DailyFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DailyFileSink {
            dir: dir.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, kind: RecordKind, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}-{}.txt", kind.sink_name(), day.format("%Y-%m-%d")))
    }

    fn append(&self, kind: RecordKind, data: &[u8], day: NaiveDate) -> Result<(), SinkError> {
        let path = self.path_for(kind, day);
        let io_err = |source: std::io::Error| SinkError::Io {
            path: path.clone(),
            source,
        };

        let mut files = match self.files.lock() {
            Ok(files) => files,
            Err(poisoned) => poisoned.into_inner(),
        };
        let needs_open = files.get(&kind).map_or(true, |open| open.day != day);
        if needs_open {
            let file = open_append(&self.dir, &path).map_err(io_err)?;
            debug!("Local sink opened {}", path.display());
            files.insert(kind, OpenFile { day, file });
        }

        if let Some(open) = files.get_mut(&kind) {
            let mut line = Vec::with_capacity(data.len() + 1);
            line.extend_from_slice(data);
            line.push(b'\n');
            open.file.write_all(&line).map_err(io_err)?;
        }
        Ok(())
    }
}

fn open_append(dir: &Path, path: &Path) -> std::io::Result<File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new().create(true).append(true).open(path)
}

impl LocalSink for DailyFileSink {
    fn write(&self, kind: RecordKind, data: &[u8]) {
        if let Err(e) = self.append(kind, data, Utc::now().date_naive()) {
            error!("Local sink write failed: {e}");
        }
    }
}
