use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use ebics::codec::base64_decode;
use ebics::crypto::{load_public_key_pem, verify_a006};
use ebics::signature::{authenticated_c14n, authenticated_digest, verify};
use ebics::xml::Document;

/// Offline checks of EBICS signatures
#[derive(Parser, Debug)]
#[command(name = "verifier", version, about)]
struct Args {
    /// Print the command line reference as markdown and exit
    #[arg(long, hide = true)]
    markdown_help: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the AuthSignature (X002) of a request or response
    Auth {
        /// EBICS XML document
        #[arg(long)]
        document: PathBuf,
        /// X002 public key of the signer, PEM
        #[arg(long)]
        key: PathBuf,
    },

    /// Verify an A006 electronic signature over order data
    Order {
        /// Plain (decrypted, decompressed) order data
        #[arg(long)]
        data: PathBuf,
        /// Signature value, base64
        #[arg(long)]
        signature: String,
        /// A006 public key of the signer, PEM
        #[arg(long)]
        key: PathBuf,
    },

    /// Print the canonicalized authenticated elements and their digest
    C14n {
        #[arg(long)]
        document: PathBuf,
    },
}

fn read_document(path: &Path) -> anyhow::Result<Document> {
    let xml = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Document::parse(&xml).with_context(|| format!("parsing {}", path.display()))
}

fn read_key(path: &Path) -> anyhow::Result<rsa::RsaPublicKey> {
    let pem = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    load_public_key_pem(&pem).with_context(|| format!("loading public key {}", path.display()))
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    if args.markdown_help {
        clap_markdown::print_help_markdown::<Args>();
        return Ok(ExitCode::SUCCESS);
    }
    let Some(command) = args.command else {
        anyhow::bail!("no command given, see --help");
    };

    let valid = match command {
        Command::Auth { document, key } => {
            let valid = verify(&read_document(&document)?, &read_key(&key)?)?;
            info!("AuthSignature of {} checked", document.display());
            valid
        }
        Command::Order { data, signature, key } => {
            let order_data = fs::read(&data).with_context(|| format!("reading {}", data.display()))?;
            verify_a006(&base64_decode(&signature)?, &order_data, &read_key(&key)?)
        }
        Command::C14n { document } => {
            let document = read_document(&document)?;
            println!("{}", authenticated_c14n(&document)?);
            println!("digest: {}", hex::encode_upper(authenticated_digest(&document)?));
            return Ok(ExitCode::SUCCESS);
        }
    };

    if valid {
        println!("signature valid");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("signature INVALID");
        Ok(ExitCode::FAILURE)
    }
}
