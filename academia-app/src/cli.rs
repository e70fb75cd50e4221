//! `academia` command line client

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;

use academia_core::directory::Directory;

use crate::auth::{
    AuthNotification, AuthService, AuthSnapshot, ClientStorage, FieldError, FileStorage,
    MemoryStorage, ProfileRepository, RouteDecision, RouteGuard,
    SessionSynchronizer, SignInForm, SignUpForm, StorageCleaner,
};
use crate::config::Settings;
use crate::logging::init_logging;
use crate::provider::{HostedAuthClient, HostedProfileStore};

/// How long `sign-in` waits for the profile before printing the status
const PROFILE_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "academia", version, about = "Academia account client")]
struct Cli {
    /// Settings file, instead of academia.toml in the config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log to stderr only
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    SignIn {
        email: String,
        #[arg(long, env = "ACADEMIA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Register a new academy administrator
    SignUp {
        name: String,
        email: String,
        #[arg(long, env = "ACADEMIA_PASSWORD", hide_env_values = true)]
        password: String,
        /// Defaults to --password
        #[arg(long)]
        confirm_password: Option<String>,
    },
    /// Sign out on every device
    SignOut,
    /// Show the current session, profile and route decision
    Status,
    /// Remove cached credentials from client storage
    CleanStorage,
}

pub fn launch() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let settings = Settings::load(cli.config.as_deref())?;
    let log_dir = if cli.no_log_file {
        None
    } else {
        Directory::logs_directory()
    };
    let _guard = init_logging(log_dir.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(execute(cli.command, settings))
}

async fn execute(command: Command, settings: Settings) -> Result<bool> {
    let session_storage: Arc<dyn ClientStorage> = Arc::new(MemoryStorage::default());
    let persistent: Arc<dyn ClientStorage> =
        Arc::new(FileStorage::open_default().context("Failed to open client storage")?);
    let cleaner = StorageCleaner::new(
        session_storage,
        persistent.clone(),
        settings.storage_prefixes.clone(),
    );

    match command {
        Command::CleanStorage => {
            let removed = cleaner.clean();
            println!("Removed {removed} cached credential entries");
            Ok(true)
        }
        Command::Status => {
            let client = Client::connect(&settings, persistent, cleaner).await?;
            client.print_status(&client.sync.snapshot());
            Ok(true)
        }
        Command::SignIn { email, password } => {
            let form = SignInForm { email, password };
            if let Err(errors) = form.validate() {
                print_field_errors(&errors);
                return Ok(false);
            }

            let client = Client::connect(&settings, persistent, cleaner).await?;
            let signed_in = client
                .service
                .sign_in(form.email.trim(), &form.password)
                .await
                .is_ok();
            client.print_notifications();
            if signed_in {
                let snapshot = client.wait_for_profile().await;
                client.print_status(&snapshot);
            }
            Ok(signed_in)
        }
        Command::SignUp {
            name,
            email,
            password,
            confirm_password,
        } => {
            let form = SignUpForm {
                confirm_password: confirm_password.unwrap_or_else(|| password.clone()),
                name,
                email,
                password,
            };
            if let Err(errors) = form.validate() {
                print_field_errors(&errors);
                return Ok(false);
            }

            let client = Client::connect(&settings, persistent, cleaner).await?;
            let result = client
                .service
                .sign_up(&form.name, &form.email, &form.password)
                .await;
            client.print_notifications();
            Ok(result.is_ok())
        }
        Command::SignOut => {
            let client = Client::connect(&settings, persistent, cleaner).await?;
            let result = client.service.sign_out().await;
            client.print_notifications();
            Ok(result.is_ok())
        }
    }
}

fn print_field_errors(errors: &[FieldError]) {
    for error in errors {
        eprintln!("{}: {}", error.field, error.message);
    }
}

/// Everything a command needs to talk to the hosted service
struct Client {
    service: AuthService,
    sync: SessionSynchronizer,
    notifications: Receiver<AuthNotification>,
    guard: RouteGuard,
}

impl Client {
    async fn connect(
        settings: &Settings,
        persistent: Arc<dyn ClientStorage>,
        cleaner: StorageCleaner,
    ) -> Result<Self> {
        let provider = settings.provider()?;
        let auth = Arc::new(HostedAuthClient::new(
            &provider.url,
            provider.anon_key,
            provider.request_timeout,
            persistent,
        )?);
        let profiles = ProfileRepository::new(Arc::new(HostedProfileStore::new(
            auth.clone(),
            settings.profile_table.clone(),
        )));

        let (tx, notifications) = crossbeam_channel::unbounded();
        let service = AuthService::new(auth.clone(), profiles.clone(), cleaner, Arc::new(tx));
        let sync = SessionSynchronizer::start(auth, profiles);
        sync.wait_until_ready().await;

        Ok(Self {
            service,
            sync,
            notifications,
            guard: RouteGuard::new(settings.sign_in_path.clone()),
        })
    }

    async fn wait_for_profile(&self) -> AuthSnapshot {
        let mut view = self.sync.subscribe();
        let ready = tokio::time::timeout(
            PROFILE_WAIT,
            view.wait_for(|s| s.user.is_none() || s.profile.is_some()),
        )
        .await;
        match ready {
            Ok(Some(snapshot)) => snapshot,
            _ => {
                tracing::warn!("Profile not available after {:?}", PROFILE_WAIT);
                self.sync.snapshot()
            }
        }
    }

    fn print_notifications(&self) {
        for notification in self.notifications.try_iter() {
            match notification {
                AuthNotification::Success(message) => println!("{message}"),
                AuthNotification::Error(message) => eprintln!("{message}"),
            }
        }
    }

    fn print_status(&self, snapshot: &AuthSnapshot) {
        match (&snapshot.session, &snapshot.user) {
            (Some(session), Some(user)) => {
                println!(
                    "Signed in as {} ({})",
                    user.email.as_deref().unwrap_or("no email"),
                    user.id
                );
                if let Some(expires) = session
                    .expires_at
                    .and_then(|at| chrono::DateTime::from_timestamp(at, 0))
                {
                    println!("Session expires {}", expires.to_rfc3339());
                }
            }
            _ => println!("Not signed in"),
        }

        match &snapshot.profile {
            Some(profile) => println!(
                "Profile: {} <{}>, {}, academy {}",
                profile.name, profile.email, profile.role, profile.academy_id
            ),
            None if snapshot.user.is_some() => println!("Profile: not loaded"),
            None => {}
        }

        match self.guard.check(snapshot) {
            RouteDecision::Pending => println!("Protected views: waiting for auth state"),
            RouteDecision::Redirect { to } => println!("Protected views: redirect to {to}"),
            RouteDecision::Render => println!("Protected views: allowed"),
        }
    }
}
