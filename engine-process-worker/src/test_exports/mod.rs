// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! In-process sandbox doubles for tests.

mod fake_sandbox;

pub use fake_sandbox::{FakeSandboxLauncher, SandboxConnector, SandboxScript, ScriptStep};
