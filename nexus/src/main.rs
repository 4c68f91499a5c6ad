//! Subscriber side command line: key generation and backups, INI/HIA letters, rendering
//! key management requests and a loopback run against an in-process sandbox.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info};
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;

use ebics::archive::unzip_files;
use ebics::crypto::public_key_hash_hex;
use ebics::messages::{
    now, EbicsNoPubKeyDigestsRequest, EbicsUnsecuredRequest, HiaRequestOrderData, PubKeyValue,
    SignaturePubKeyOrderData, XmlMessage,
};
use ebics::server::{HostRecord, MemoryOrderHandler, MemoryStore, SubscriberRecord};
use ebics::signature;
use ebics::subscriber::KeyBackup;
use ebics::{
    ClientConfig, ClientSubscriber, DownloadResult, EbicsClient, EbicsHost, HostConfig, SubscriberId,
    SubscriberKeyMaterial, UploadResult,
};

/// EBICS subscriber tool
#[derive(Parser, Debug)]
#[command(name = "nexus", version, about)]
struct Args {
    /// Client configuration (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the command line reference as markdown and exit
    #[arg(long, hide = true)]
    markdown_help: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate signature, authentication and encryption keys into a passphrase protected backup
    Keygen {
        #[arg(long)]
        host_id: String,
        #[arg(long)]
        partner_id: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        system_id: Option<String>,
        /// Backup file to write
        #[arg(long)]
        out: PathBuf,
        #[arg(long, env = "NEXUS_PASSPHRASE")]
        passphrase: String,
    },

    /// Re-encrypt a key backup under a new passphrase
    Rekey {
        #[arg(long)]
        backup: PathBuf,
        #[arg(long, env = "NEXUS_PASSPHRASE")]
        passphrase: String,
        #[arg(long, env = "NEXUS_NEW_PASSPHRASE")]
        new_passphrase: String,
    },

    /// Print the public key hashes for the INI and HIA letters
    Letters {
        #[arg(long)]
        backup: PathBuf,
        #[arg(long, env = "NEXUS_PASSPHRASE")]
        passphrase: String,
    },

    /// Print a key management request as it would be sent
    Render {
        #[arg(long)]
        backup: PathBuf,
        #[arg(long, env = "NEXUS_PASSPHRASE")]
        passphrase: String,
        #[arg(long, value_enum)]
        order: KeyOrder,
    },

    /// Run key exchange, an upload and a download against an in-process sandbox
    Demo {
        /// File to upload as CCT order, a sample pain.001 when omitted
        #[arg(long)]
        upload: Option<PathBuf>,
        /// Sandbox configuration (JSON); defaults apply when omitted
        #[arg(long)]
        host_config: Option<PathBuf>,
    },

    /// Unpack a zipped statement download
    Unzip {
        #[arg(long)]
        input: PathBuf,
        /// Directory the files are written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KeyOrder {
    Ini,
    Hia,
    Hpb,
}

const SAMPLE_PAIN001: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:pain.001.001.03"><CstmrCdtTrfInitn><GrpHdr><MsgId>DEMO-1</MsgId><NbOfTxs>1</NbOfTxs><CtrlSum>10.00</CtrlSum></GrpHdr></CstmrCdtTrfInitn></Document>
"#;

const SAMPLE_CAMT053: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02"><BkToCstmrStmt><GrpHdr><MsgId>STMT-1</MsgId></GrpHdr></BkToCstmrStmt></Document>
"#;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.markdown_help {
        clap_markdown::print_help_markdown::<Args>();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => ClientConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    debug!("client configuration: {config:?}");

    let Some(command) = args.command else {
        bail!("no command given, see --help");
    };

    match command {
        Command::Keygen {
            host_id,
            partner_id,
            user_id,
            system_id,
            out,
            passphrase,
        } => {
            let mut id = SubscriberId::new(&host_id, &partner_id, &user_id);
            if let Some(system_id) = system_id {
                id = id.with_system_id(&system_id);
            }
            info!("generating {} bit keys for {id}", config.key_bits);
            let subscriber = ClientSubscriber::new(id, SubscriberKeyMaterial::generate(config.key_bits)?);
            write_backup(&out, &subscriber, &passphrase)?;
            println!("keys for {} written to {}", subscriber.id, out.display());
        }
        Command::Rekey {
            backup,
            passphrase,
            new_passphrase,
        } => {
            let subscriber = read_backup(&backup, &passphrase)?;
            write_backup(&backup, &subscriber, &new_passphrase)?;
            println!("{} re-encrypted", backup.display());
        }
        Command::Letters { backup, passphrase } => {
            let subscriber = read_backup(&backup, &passphrase)?;
            println!("Subscriber {}", subscriber.id);
            print_letter("INI", "A006", &subscriber.keys.signature.to_public_key());
            print_letter("HIA", "X002", &subscriber.keys.authentication.to_public_key());
            print_letter("HIA", "E002", &subscriber.keys.encryption.to_public_key());
        }
        Command::Render {
            backup,
            passphrase,
            order,
        } => {
            let subscriber = read_backup(&backup, &passphrase)?;
            println!("{}", render(&subscriber, &config, order)?);
        }
        Command::Demo { upload, host_config } => {
            let payload = match upload {
                Some(path) => fs::read(&path).with_context(|| format!("reading {}", path.display()))?,
                None => SAMPLE_PAIN001.as_bytes().to_vec(),
            };
            let host_config = match host_config {
                Some(path) => HostConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
                None => HostConfig::default(),
            };
            demo(config, host_config, payload)?;
        }
        Command::Unzip { input, out } => {
            let archive = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            for (name, content) in unzip_files(&archive)? {
                let file_name = Path::new(&name)
                    .file_name()
                    .with_context(|| format!("archive entry '{name}' has no file name"))?;
                let target = out.join(file_name);
                fs::write(&target, content).with_context(|| format!("writing {}", target.display()))?;
                println!("{}", target.display());
            }
        }
    }
    Ok(())
}

fn read_backup(path: &Path, passphrase: &str) -> anyhow::Result<ClientSubscriber> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let subscriber = KeyBackup::from_json(&json)?
        .restore(passphrase)
        .context("restoring keys, wrong passphrase?")?;
    Ok(subscriber)
}

fn write_backup(path: &Path, subscriber: &ClientSubscriber, passphrase: &str) -> anyhow::Result<()> {
    let json = KeyBackup::create(subscriber, passphrase)?.to_json()?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

fn print_letter(order: &str, version: &str, key: &RsaPublicKey) {
    println!();
    println!("{order} {version}");
    println!("  Exponent: {}", hex::encode_upper(key.e().to_bytes_be()));
    println!("  Modulus:  {}", hex::encode_upper(key.n().to_bytes_be()));
    println!("  Hash:     {}", public_key_hash_hex(key));
}

fn render(subscriber: &ClientSubscriber, config: &ClientConfig, order: KeyOrder) -> anyhow::Result<String> {
    let id = &subscriber.id;
    let xml = match order {
        KeyOrder::Ini => EbicsUnsecuredRequest::ini(
            id,
            config.product(),
            &SignaturePubKeyOrderData {
                signature_pub_key: PubKeyValue::from_public_key(&subscriber.keys.signature.to_public_key(), Some(now())),
                partner_id: id.partner_id.clone(),
                user_id: id.user_id.clone(),
            },
        )?
        .to_xml(),
        KeyOrder::Hia => EbicsUnsecuredRequest::hia(
            id,
            config.product(),
            &HiaRequestOrderData {
                authentication_pub_key: PubKeyValue::from_public_key(
                    &subscriber.keys.authentication.to_public_key(),
                    Some(now()),
                ),
                encryption_pub_key: PubKeyValue::from_public_key(
                    &subscriber.keys.encryption.to_public_key(),
                    Some(now()),
                ),
                partner_id: id.partner_id.clone(),
                user_id: id.user_id.clone(),
            },
        )?
        .to_xml(),
        KeyOrder::Hpb => {
            let mut document = EbicsNoPubKeyDigestsRequest::hpb(id, config.product()).to_document();
            signature::sign(&mut document, &subscriber.keys.authentication)?;
            document.to_xml()
        }
    };
    Ok(xml)
}

fn demo(config: ClientConfig, host_config: HostConfig, payload: Vec<u8>) -> anyhow::Result<()> {
    info!("generating bank and subscriber keys");
    let store = MemoryStore::new();
    store.add_host(HostRecord::generate(&host_config.host_id, host_config.key_bits)?)?;
    let id = SubscriberId::new(&host_config.host_id, "PARTNER1", "USER1");
    store.add_subscriber(SubscriberRecord::new(id.clone()))?;
    let orders = MemoryOrderHandler::default();
    orders.add_download("C53", SAMPLE_CAMT053.as_bytes().to_vec())?;
    let sandbox = EbicsHost::new(host_config, store, orders);

    let client = EbicsClient::new(config, |body: &str| sandbox.handle(body));
    let subscriber = ClientSubscriber::new(id, SubscriberKeyMaterial::generate(client.config().key_bits)?);

    for version in client.hev(&subscriber.id.host_id)? {
        println!("bank speaks {} {}", version.protocol, version.version);
    }
    client.ini(&subscriber)?;
    client.hia(&subscriber)?;
    let bank_keys = client.hpb(&subscriber)?;
    print_letter("HPB", "X002", &bank_keys.authentication);
    print_letter("HPB", "E002", &bank_keys.encryption);
    let subscriber = subscriber.with_bank_keys(bank_keys);

    match client.upload(&subscriber, "CCT", &payload)? {
        UploadResult::Success { order_id } => println!("uploaded CCT as order {order_id}"),
        UploadResult::BankError(code) => println!("upload declined: {code}"),
    }
    match client.download(&subscriber, "C53", None)? {
        DownloadResult::Success(statement) => {
            println!("downloaded C53:\n{}", String::from_utf8_lossy(&statement))
        }
        DownloadResult::BankError(code) => println!("download declined: {code}"),
    }
    Ok(())
}
