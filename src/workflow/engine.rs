use super::WorkflowError;

/// Engines this service knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    AutoCad,
}

/// Per-engine activity template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineAttributes {
    /// Command line with `{bundle}` standing for the bundle name.
    pub command_line: &'static str,
    /// Extension of the produced output file.
    pub extension: &'static str,
    /// Script passed to the engine as the `script` setting.
    pub script: &'static str,
}

const AUTOCAD: EngineAttributes = EngineAttributes {
    command_line: r#"$(engine.path)\accoreconsole.exe /i "$(args[inputFile].path)" /al "$(appbundles[{bundle}].path)" /s $(settings[script].path)"#,
    extension: "dwg",
    script: "UpdateParam\n",
};

impl EngineKind {
    /// Resolve an engine id such as `Autodesk.AutoCAD+24_1`.
    pub fn from_engine_id(engine: &str) -> Result<Self, WorkflowError> {
        let product = engine.split('+').next().unwrap_or_default();
        match product {
            "Autodesk.AutoCAD" => Ok(EngineKind::AutoCad),
            _ => Err(WorkflowError::UnknownEngine(engine.to_string())),
        }
    }

    pub fn attributes(self) -> EngineAttributes {
        match self {
            EngineKind::AutoCad => AUTOCAD,
        }
    }

    pub fn command_line(self, bundle_name: &str) -> String {
        self.attributes().command_line.replace("{bundle}", bundle_name)
    }
}
