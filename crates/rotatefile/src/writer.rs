// Copyright 2024 RustFS Team
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

use crate::file::RotateFile;
use tracing_subscriber::fmt::MakeWriter;

/// Lets a [`RotateFile`] (or an `Arc` of one) be the sink of a
/// `tracing_subscriber::fmt` layer. Each formatted event is one write.
impl<'a> MakeWriter<'a> for RotateFile {
    type Writer = &'a RotateFile;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}
