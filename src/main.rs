use std::process::ExitCode;
use std::thread;

use clap::Parser;

use pg_drill_lib::cli::Cli;
use pg_drill_lib::config::{self, Configuration, RawConfig};
use pg_drill_lib::cycle::backup::BackupCycle;
use pg_drill_lib::cycle::cipher::OpensslCipher;
use pg_drill_lib::cycle::restore::RestoreCycle;
use pg_drill_lib::notify::Notifier;
use pg_drill_lib::postgres::PgTools;
use pg_drill_lib::sched::{Scheduler, ShutdownFlag};
use pg_drill_lib::storage::transport::StorageTransport;
use pg_drill_lib::storage::S3Cli;
use pg_drill_lib::util::retry::RetryPolicy;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let raw: RawConfig = match std::fs::read_to_string(&cli.config) {
        Ok(config_str) => match toml::from_str(&config_str) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Reading the config file failed: {e}");
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            if std::fs::exists(&cli.config).is_ok_and(|b| !b) {
                log::error!(
                    "No config at {}, writing a starter template there. \
                     Fill in the required fields and start again.",
                    cli.config.display()
                );
                if let Err(e) = std::fs::write(&cli.config, config::default_template()) {
                    log::error!("Writing the starter template failed: {e}");
                }
            } else {
                log::error!("Reading the config file failed: {e}");
            }
            return ExitCode::FAILURE;
        }
    };

    // Validation includes the safety guard: a config whose verification
    // target equals production never gets past this point.
    let cfg = match Configuration::validate(raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!(target: "config", "Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let dry_run = cli.dry_run;
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let shutdown = ShutdownFlag::new();
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Termination signal received, finishing the current cycle");
            shutdown.request();
        }) {
            log::warn!("Could not register the signal handler: {e}");
        }
    }

    if cli.once {
        run_backup_once(&cfg, dry_run);
        if cfg.verification.is_some() && !dry_run {
            run_restore_once(&cfg);
        }
        return ExitCode::SUCCESS;
    }

    // one scheduler thread per cycle type

    let backup = {
        let cfg = cfg.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || backup_loop(cfg, shutdown, dry_run))
    };

    let restore = (cfg.verification.is_some() && !dry_run).then(|| {
        let cfg = cfg.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || restore_loop(cfg, shutdown))
    });

    backup.join().expect("no panic in backup scheduler");
    if let Some(restore) = restore {
        restore.join().expect("no panic in restore scheduler");
    }

    ExitCode::SUCCESS
}

fn run_backup_once(cfg: &Configuration, dry_run: bool) {
    let tools = PgTools;
    let transport = StorageTransport::new(S3Cli::new(cfg.storage.clone()), RetryPolicy::default());
    let cipher = cfg.encryption_key.clone().map(OpensslCipher::new);
    let notifier = Notifier::new(cfg);

    BackupCycle::new(cfg, &tools, &tools, &transport, cipher.as_ref(), &notifier, dry_run).run();
}

fn run_restore_once(cfg: &Configuration) {
    let Some(verification) = &cfg.verification else {
        return;
    };
    let tools = PgTools;
    let transport = StorageTransport::new(S3Cli::new(cfg.storage.clone()), RetryPolicy::default());
    let cipher = cfg.encryption_key.clone().map(OpensslCipher::new);
    let notifier = Notifier::new(cfg);

    RestoreCycle::new(
        cfg,
        verification,
        &tools,
        &tools,
        &transport,
        cipher.as_ref(),
        &notifier,
    )
    .run();
}

fn backup_loop(cfg: Configuration, shutdown: ShutdownFlag, dry_run: bool) {
    let tools = PgTools;
    let transport = StorageTransport::new(S3Cli::new(cfg.storage.clone()), RetryPolicy::default());
    let cipher = cfg.encryption_key.clone().map(OpensslCipher::new);
    let notifier = Notifier::new(&cfg);
    let cycle = BackupCycle::new(
        &cfg,
        &tools,
        &tools,
        &transport,
        cipher.as_ref(),
        &notifier,
        dry_run,
    );

    Scheduler::new("backup", cfg.backup_interval, shutdown).run(|| {
        cycle.run();
    });
}

fn restore_loop(cfg: Configuration, shutdown: ShutdownFlag) {
    let Some(verification) = &cfg.verification else {
        return;
    };
    let tools = PgTools;
    let transport = StorageTransport::new(S3Cli::new(cfg.storage.clone()), RetryPolicy::default());
    let cipher = cfg.encryption_key.clone().map(OpensslCipher::new);
    let notifier = Notifier::new(&cfg);
    let cycle = RestoreCycle::new(
        &cfg,
        verification,
        &tools,
        &tools,
        &transport,
        cipher.as_ref(),
        &notifier,
    );

    Scheduler::new("restore", verification.interval, shutdown).run(|| {
        cycle.run();
    });
}
