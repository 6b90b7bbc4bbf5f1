use std::path::PathBuf;

use clap::{Parser, Subcommand};
use workino::config::Config;
use workino::credentials::{CredentialError, CredentialStore, FileCredentialStore, MemoryCredentialStore};
use workino::forms::{FieldError, LoginForm, ResetPasswordForm, SignupForm, VerifyEmailForm};
use workino::guard::{Decision, NavigateMode, RouteGuard};
use workino::onboarding::{UsageMode, UsageType};
use workino::route;
use workino::service::Session;
use workino::session::SessionState;
use workino::source::{ApiClient, SourceError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("api request failed: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("not signed in; run `workino-cli login` first")]
    NotSignedIn,
    #[error("invalid {field}: {value}")]
    InvalidArg { field: &'static str, value: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("{0}")]
    Form(FieldError),
}

#[derive(Parser, Debug)]
#[command(name = "workino-cli", about = "Workino session and route guard CLI")]
struct Cli {
    #[arg(long, env = "WORKINO_API_URL")]
    base_url: Option<String>,

    #[arg(long, env = "WORKINO_TOKEN_PATH")]
    token_path: Option<PathBuf>,

    /// Use this token for the run instead of the token file. Nothing is
    /// written to disk. Takes precedence over `--token-path`.
    #[arg(long, env = "WORKINO_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the guard class of a path.
    Classify { path: String },
    /// Resolve the stored session and print the user.
    Whoami,
    /// Sign in and store the issued token.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "WORKINO_PASSWORD")]
        password: String,
    },
    /// Forget the stored token.
    Logout,
    /// Submit the onboarding answers for the signed-in user.
    Onboard {
        #[arg(long, help = "personal, professional, or other")]
        usage_type: String,
        #[arg(long, help = "alone or team")]
        usage_mode: String,
    },
    /// Resolve the session and print what the guard does for a path.
    Route { path: String },
    /// Create an account. It must verify its email before signing in.
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "WORKINO_PASSWORD")]
        password: String,
        #[arg(long, help = "accept the terms of service and privacy policy")]
        agree_terms: bool,
    },
    /// Confirm an email address with the emailed six-digit code.
    VerifyEmail {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
    },
    /// Send a fresh verification code.
    ResendCode {
        #[arg(long)]
        email: String,
    },
    /// Set a new password with the token from a reset link.
    ResetPassword {
        #[arg(long)]
        email: String,
        #[arg(long)]
        token: String,
        #[arg(long, env = "WORKINO_PASSWORD")]
        password: String,
    },
}

/// Token file by default, or a throwaway in-memory slot for `--token`.
#[derive(Debug)]
enum CliStore {
    File(FileCredentialStore),
    Memory(MemoryCredentialStore),
}

impl CredentialStore for CliStore {
    fn load(&self) -> Result<Option<String>, CredentialError> {
        match self {
            Self::File(store) => store.load(),
            Self::Memory(store) => store.load(),
        }
    }

    fn store(&self, token: &str) -> Result<(), CredentialError> {
        match self {
            Self::File(store) => store.store(token),
            Self::Memory(store) => store.store(token),
        }
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match self {
            Self::File(store) => store.clear(),
            Self::Memory(store) => store.clear(),
        }
    }
}

type CliSession = Session<ApiClient, CliStore>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(base_url) = cli.base_url {
        config.api_base_url = base_url.trim_end_matches('/').to_owned();
    }
    if let Some(token_path) = cli.token_path {
        config.credential_path = token_path;
    }

    if let Command::Classify { path } = &cli.command {
        println!("{}", route::classify(path));
        return Ok(());
    }

    let client = ApiClient::new(&config.api_base_url, config.request_timeout)?;
    let store = match cli.token.as_deref() {
        Some(token) => CliStore::Memory(MemoryCredentialStore::with_token(token)),
        None => CliStore::File(FileCredentialStore::new(&config.credential_path)),
    };
    let session = Session::new(client, store);

    match cli.command {
        Command::Classify { .. } => Ok(()),
        Command::Whoami => run_whoami(&session).await,
        Command::Login { email, password } => run_login(&session, &email, &password).await,
        Command::Logout => {
            session.sign_out();
            println!("signed out");
            Ok(())
        }
        Command::Onboard { usage_type, usage_mode } => run_onboard(&session, &usage_type, &usage_mode).await,
        Command::Route { path } => run_route(&session, &config, &path).await,
        Command::Register { full_name, email, password, agree_terms } => {
            let form = SignupForm { full_name, email, confirm_password: password.clone(), password, agree_terms };
            let request = form.validate().map_err(CliError::Form)?;
            println!("{}", session.source().signup(&request).await?);
            Ok(())
        }
        Command::VerifyEmail { email, code } => {
            let form = VerifyEmailForm { email, code };
            let request = form.validate().map_err(CliError::Form)?;
            println!("{}", session.source().verify_email(&request).await?);
            Ok(())
        }
        Command::ResendCode { email } => {
            let form = VerifyEmailForm { email, code: String::new() };
            let request = form.resend().map_err(CliError::Form)?;
            println!("{}", session.source().resend_code(&request).await?);
            Ok(())
        }
        Command::ResetPassword { email, token, password } => {
            let form = ResetPasswordForm {
                email: Some(email),
                token: Some(token),
                confirm_password: password.clone(),
                password,
            };
            let request = form.validate().map_err(CliError::Form)?;
            println!("{}", session.source().reset_password(&request).await?);
            Ok(())
        }
    }
}

async fn run_whoami(session: &CliSession) -> Result<(), CliError> {
    match session.start().await.user() {
        Some(user) => print_json(&serde_json::to_value(user)?),
        None => {
            println!("anonymous");
            Ok(())
        }
    }
}

async fn run_login(session: &CliSession, email: &str, password: &str) -> Result<(), CliError> {
    let form = LoginForm { email: email.to_owned(), password: password.to_owned() };
    let request = form.validate().map_err(CliError::Form)?;
    let token = session.source().login(request.email, request.password).await?;
    let state = session.sign_in(&token).await?;
    let Some(user) = state.user() else {
        return Err(CliError::NotSignedIn);
    };
    tracing::info!(user = %user.id, onboarded = user.is_onboarded, "signed in");
    print_json(&serde_json::to_value(user)?)
}

async fn run_onboard(session: &CliSession, usage_type: &str, usage_mode: &str) -> Result<(), CliError> {
    let usage_type = UsageType::parse(usage_type).ok_or_else(|| CliError::InvalidArg {
        field: "usage type",
        value: usage_type.to_owned(),
    })?;
    let usage_mode = UsageMode::parse(usage_mode).ok_or_else(|| CliError::InvalidArg {
        field: "usage mode",
        value: usage_mode.to_owned(),
    })?;

    let mut draft = workino::onboarding::OnboardingDraft::default();
    draft.select_usage_type(usage_type);
    draft.advance();
    draft.select_usage_mode(usage_mode);
    let Some(submission) = draft.submission() else {
        return Err(CliError::InvalidArg { field: "onboarding", value: "incomplete".to_owned() });
    };

    if !session.start().await.is_authenticated() {
        return Err(CliError::NotSignedIn);
    }
    let token = session.token()?.ok_or(CliError::NotSignedIn)?;
    session.source().complete_onboarding(&token, &submission).await?;

    let state = session.refresh().await;
    println!("onboarded: {}", state.user().is_some_and(|u| u.is_onboarded));
    Ok(())
}

async fn run_route(session: &CliSession, config: &Config, path: &str) -> Result<(), CliError> {
    let state = session.start().await;
    let mut guard = RouteGuard::new(config.navigate_mode);
    let decision = guard.evaluate(&state, path, &|to: &str, mode: NavigateMode| {
        tracing::debug!(to, ?mode, "navigate");
    });

    println!("{} {}", describe_session(&state), route::classify(path));
    match decision {
        Decision::Pending => println!("pending"),
        Decision::Stay => println!("stay"),
        Decision::Redirect(target) => println!("redirect {target}"),
    }
    Ok(())
}

fn describe_session(state: &SessionState) -> &'static str {
    match state.user() {
        None if state.is_settled() => "anonymous",
        None => "unresolved",
        Some(user) if user.is_onboarded => "onboarded",
        Some(_) => "needs-onboarding",
    }
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
