use std::process::{ExitCode, Termination};

use crate::prioritise::conf::ConfigError;
use crate::prioritise::panelapp::PanelAppError;
use crate::prioritise::panels::{GenePanelsError, PanelError};

/// Fatal errors that abort a run, classified by process exit code.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not resolve panel: {0}")]
    Panel(#[from] PanelError),
    #[error("could not load genepanels table: {0}")]
    GenePanels(#[from] GenePanelsError),
    #[error("could not load PanelApp dump: {0}")]
    PanelApp(#[from] PanelAppError),
    #[error("problem with input VCF: {0}")]
    Input(String),
    #[error("problem with output: {0}")]
    Output(String),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 2,
            AppError::Panel(_) | AppError::GenePanels(_) | AppError::PanelApp(_) => 3,
            AppError::Input(_) | AppError::Output(_) => 4,
        }
    }
}

impl Termination for AppError {
    fn report(self) -> ExitCode {
        ExitCode::from(self.exit_code())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::AppError;
    use crate::prioritise::conf::ConfigError;
    use crate::prioritise::panels::PanelError;

    #[rstest]
    #[case(AppError::Config(ConfigError::MissingKey("flag_name".into())), 2)]
    #[case(AppError::Panel(PanelError::PanelNotFound("R1".into())), 3)]
    #[case(AppError::Input("missing".into()), 4)]
    #[case(AppError::Output("read-only".into()), 4)]
    fn exit_code(#[case] err: AppError, #[case] expected: u8) {
        assert_eq!(err.exit_code(), expected);
    }

    #[test]
    fn downcast_through_anyhow() {
        let err = anyhow::Error::from(AppError::Panel(PanelError::EmptyPanelSpec));

        assert_eq!(
            err.downcast_ref::<AppError>().map(AppError::exit_code),
            Some(3)
        );
        assert!(anyhow::anyhow!("other").downcast_ref::<AppError>().is_none());
    }
}
