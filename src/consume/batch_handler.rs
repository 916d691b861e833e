// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::{self, Write};

use crate::message::Batch;
use crate::AppResult;

/// Downstream processing of accumulated batches. The handler owns the batch;
/// its messages are released when the handler drops them.
pub trait BatchHandler: Send {
    fn handle(&mut self, batch: Batch) -> AppResult<()>;
}

impl<F> BatchHandler for F
where
    F: FnMut(Batch) -> AppResult<()> + Send,
{
    fn handle(&mut self, batch: Batch) -> AppResult<()> {
        self(batch)
    }
}

/// Writes a short report of every batch:
///
/// ```text
/// Accumulated 1 messages:
///  Message in temperature-service [0] at offset 4
///  * <?xml version="1.0" standalone="yes" ?><temperature>98.600000</temperature>
/// ```
pub struct PrintBatchHandler<W> {
    out: W,
}

impl PrintBatchHandler<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> PrintBatchHandler<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> BatchHandler for PrintBatchHandler<W> {
    fn handle(&mut self, batch: Batch) -> AppResult<()> {
        writeln!(self.out, "Accumulated {} messages:", batch.len())?;
        for message in batch {
            writeln!(self.out, " Message in {}", message)?;
            writeln!(
                self.out,
                " * {}",
                String::from_utf8_lossy(message.payload())
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}
