use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReloadResult {
    is_success: bool,
    exit_code: Option<i32>,
    error_message: Option<String>,
}

impl ReloadResult {
    pub fn new() -> Self {
        Self {
            is_success: false,
            exit_code: None,
            error_message: None,
        }
    }

    pub fn set_success(&mut self, exit_code: Option<i32>) {
        self.is_success = true;
        self.exit_code = exit_code;
        self.error_message = None;
    }

    pub fn set_failure(&mut self, exit_code: Option<i32>, error_message: String) {
        self.is_success = false;
        self.exit_code = exit_code;
        self.error_message = Some(error_message);
    }

    pub fn is_success(&self) -> bool {
        self.is_success
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn error_message(&self) -> Option<&String> {
        self.error_message.as_ref()
    }
}

impl Default for ReloadResult {
    fn default() -> Self {
        Self::new()
    }
}

/// What a single supervisor tick did.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TickReport {
    reload: Option<ReloadResult>,
    restarted_pid: Option<u32>,
}

impl TickReport {
    pub fn new(reload: Option<ReloadResult>, restarted_pid: Option<u32>) -> Self {
        Self {
            reload,
            restarted_pid,
        }
    }

    /// The reload attempted in this tick, if the artifact changed.
    pub fn reload(&self) -> Option<&ReloadResult> {
        self.reload.as_ref()
    }

    /// Pid of the process started in this tick, if the previous one died.
    pub fn restarted_pid(&self) -> Option<u32> {
        self.restarted_pid
    }

    pub fn is_idle(&self) -> bool {
        self.reload.is_none() && self.restarted_pid.is_none()
    }
}
