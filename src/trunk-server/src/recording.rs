// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Call recordings: 16-bit mono 8 kHz WAV files under daily folders.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use hound::{SampleFormat, WavSpec, WavWriter};

pub const RECORDING_SAMPLE_RATE: u32 = 8000;

fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: RECORDING_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// `<calls_dir>/<YYYYMMDD>/<YYYYMMDD_HHMMSS>_call_<number>.wav`
pub fn recording_path(calls_dir: &Path, at: DateTime<Local>, number: u64) -> PathBuf {
    calls_dir
        .join(at.format("%Y%m%d").to_string())
        .join(format!("{}_call_{}.wav", at.format("%Y%m%d_%H%M%S"), number))
}

/// Clamp to [-1, 1] and scale to 16-bit PCM.
pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// WAV writer opened on the first write.
pub struct CallRecording {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    samples_written: u64,
    closed: bool,
}

impl CallRecording {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            samples_written: 0,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Append buffers. Writes after `close` are dropped.
    pub fn write(&mut self, buffers: &[Arc<[f32]>]) -> Result<(), hound::Error> {
        if self.closed || buffers.is_empty() {
            return Ok(());
        }
        if self.writer.is_none() {
            let file = File::create(&self.path)?;
            self.writer = Some(WavWriter::new(BufWriter::new(file), wav_spec())?);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for buffer in buffers {
            for &sample in buffer.iter() {
                writer.write_sample(to_pcm16(sample))?;
            }
            self.samples_written += buffer.len() as u64;
        }
        Ok(())
    }

    /// Finalize the WAV header. Idempotent.
    pub fn close(&mut self) -> Result<(), hound::Error> {
        self.closed = true;
        match self.writer.take() {
            Some(writer) => writer.finalize(),
            None => Ok(()),
        }
    }
}
