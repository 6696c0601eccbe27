#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sauceci::config::ConfigFile;
use sauceci::context::{Credentials, JobContext, RecordingSink};
use sauceci::fs::mock::MockFileSystem;
use sauceci::manifest::manifest_path;
use sauceci::readiness::ReadinessPolicy;

pub const WORKDIR: &str = "/work/app";

/// Builder for `JobContext` to simplify test setup. Starts from the
/// built-in config defaults with credentials set.
pub struct JobContextBuilder {
    ctx: JobContext,
    sink: RecordingSink,
}

impl JobContextBuilder {
    pub fn new() -> Self {
        let sink = RecordingSink::new();
        let ctx = JobContext::from_config(
            &ConfigFile::default(),
            PathBuf::from(WORKDIR),
            Credentials::from_parts(Some("ci-user".into()), Some("ci-key".into())),
            Arc::new(sink.clone()),
        );
        Self { ctx, sink }
    }

    pub fn without_credentials(mut self) -> Self {
        self.ctx.credentials = None;
        self
    }

    pub fn with_install(mut self, cmd: &str) -> Self {
        self.ctx.commands.install = Some(cmd.to_string());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.ctx.port = port;
        self
    }

    pub fn with_readiness(mut self, interval: Duration, attempts: u32) -> Self {
        self.ctx.readiness = ReadinessPolicy::new(interval, attempts);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.ctx.grace_period = grace;
        self
    }

    /// The context plus the sink that records its messages.
    pub fn build(self) -> (JobContext, RecordingSink) {
        (self.ctx, self.sink)
    }
}

impl Default for JobContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A mock filesystem holding `package.json` with the given start script.
pub fn manifest_fs(start: &str) -> MockFileSystem {
    manifest_fs_with(&format!(r#"{{"scripts": {{"start": "{start}"}}}}"#))
}

/// A mock filesystem holding `package.json` with raw `contents`.
pub fn manifest_fs_with(contents: &str) -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file(manifest_path(Path::new(WORKDIR)), contents);
    fs
}
