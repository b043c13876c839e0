use anyhow::Result;
use clap::Parser;
use shelfharvest::debug;
use shelfharvest::exit;
use shelfharvest::mailer::{self, SmtpSender, SmtpSettings};
use shelfharvest::models::StageSummary;
use shelfharvest::pipeline;
use shelfharvest::tui::StageTUI;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Email the analysis, merged and QR result sheets")]
struct Args {
    /// Product name used in the result file names
    #[clap(short, long)]
    product: String,

    /// Directory holding the result sheets
    #[clap(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Recipient address
    #[clap(short, long, env = "REPORT_RECIPIENT")]
    recipient: String,

    /// SMTP account, also used as the sender address
    #[clap(long, env = "SMTP_USER")]
    smtp_user: String,

    /// SMTP password or app password
    #[clap(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    smtp_password: String,

    #[clap(long, default_value = "smtp.gmail.com")]
    smtp_host: String,

    /// Implicit-TLS port
    #[clap(long, default_value = "465")]
    smtp_port: u16,

    /// Enable debug output
    #[clap(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = match exit::parse_args::<Args>() {
        Ok(args) => args,
        Err(code) => return code,
    };
    debug::init(args.debug);

    exit::run_stage("mail", |summary| run(&args, summary))
}

fn run(args: &Args, summary: &mut StageSummary) -> Result<()> {
    let product = pipeline::brand_key(&args.product);
    let tui = StageTUI::new("Report mailer");
    tui.header(&format!("results for {} in {}", product, args.out_dir.display()))?;

    let attachments = mailer::collect_attachments(&args.out_dir, &product);
    let expected = 3;
    for _ in attachments.len()..expected {
        summary.skip();
    }
    let report = mailer::build_report(&product, attachments);

    let sender = SmtpSender::new(SmtpSettings {
        host: args.smtp_host.clone(),
        port: args.smtp_port,
        user: args.smtp_user.clone(),
        password: args.smtp_password.clone(),
        recipient: args.recipient.clone(),
    });
    match mailer::send_report(&sender, &report) {
        Ok(()) => {
            for _ in &report.attachments {
                summary.success();
            }
        }
        Err(e) => {
            summary.failure();
            return Err(e);
        }
    }

    tui.final_summary(summary)?;
    Ok(())
}
