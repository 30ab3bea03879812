use async_trait::async_trait;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password, Select};
use zeroize::Zeroizing;

use ontapexec_traits::batch::Transport;
use ontapexec_traits::prompt::Prompter;

/// Answers supplied on the command line. They win over interactive prompts.
#[derive(Debug, Default, Clone)]
pub struct Presets {
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub transport: Option<Transport>,
    pub endpoint_id: Option<String>,
}

/// Prompts on the terminal for anything the presets do not cover. In
/// non-interactive mode unanswered prompts are dismissed.
pub struct CliPrompter {
    presets: Presets,
    interactive: bool,
    ask_password: bool,
}

impl CliPrompter {
    pub fn new(presets: Presets, interactive: bool) -> Self {
        Self {
            presets,
            interactive,
            ask_password: true,
        }
    }

    /// For `ssh` logins, which ask for the password themselves.
    pub fn without_password(mut self) -> Self {
        self.ask_password = false;
        self
    }
}

async fn blocking<T, F>(f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> Option<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.ok().flatten()
}

#[async_trait]
impl Prompter for CliPrompter {
    async fn username(&self, default: &str) -> Option<String> {
        if let Some(username) = &self.presets.username {
            return Some(username.clone());
        }
        if !self.interactive {
            return None;
        }
        let default = default.to_string();
        blocking(move || {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt("Enter SSH username")
                .default(default)
                .interact_text()
                .ok()
        })
        .await
    }

    async fn password(&self) -> Option<Zeroizing<String>> {
        if let Some(password) = &self.presets.password {
            return Some(password.clone());
        }
        if !self.interactive || !self.ask_password {
            return None;
        }
        blocking(|| {
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt("Enter SSH password")
                .allow_empty_password(true)
                .interact()
                .ok()
                .map(Zeroizing::new)
        })
        .await
    }

    async fn transport(&self) -> Option<Transport> {
        if let Some(transport) = self.presets.transport {
            return Some(transport);
        }
        if !self.interactive {
            return None;
        }
        blocking(|| {
            let choices = [Transport::Direct, Transport::Tunneled];
            let labels = ["Direct", "EC2 Instance Connect"];
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("How do you want to connect?")
                .items(&labels)
                .default(0)
                .interact_opt()
                .ok()
                .flatten()
                .map(|index| choices[index])
        })
        .await
    }

    async fn endpoint_id(&self) -> Option<String> {
        if let Some(endpoint_id) = &self.presets.endpoint_id {
            return Some(endpoint_id.clone());
        }
        if !self.interactive {
            return None;
        }
        blocking(|| {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt("Enter instance connect endpoint ID (e.g. eice-009518b0a3ab6ac67)")
                .interact_text()
                .ok()
        })
        .await
    }
}
