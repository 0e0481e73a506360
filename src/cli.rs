use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Storefront gateway: OAuth token exchange, webhooks and homologation for Bling and Mercado Livre
#[derive(Parser)]
#[command(name = "storefront", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to STOREFRONT_PORT, then 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the Bling homologation sequence once and print the report
    Homologate {
        #[arg(long, env = "BLING_ACCESS_TOKEN")]
        access_token: String,
        /// Used for the single reauth retry in step 4
        #[arg(long, env = "BLING_REFRESH_TOKEN")]
        refresh_token: Option<String>,
    },

    /// Print the x-bling-signature-256 value for a webhook body
    Sign {
        /// File holding the exact body bytes
        #[arg(long)]
        file: PathBuf,
        #[arg(long, env = "BLING_WEBHOOK_SECRET")]
        secret: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_none() {
        let cli = Cli::try_parse_from(["storefront"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_serve_port() {
        let cli = Cli::try_parse_from(["storefront", "serve", "--port", "8080"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { port: Some(8080) })));
    }

    #[test]
    fn test_sign_args() {
        let cli = Cli::try_parse_from(["storefront", "sign", "--file", "body.json", "--secret", "s"]).unwrap();
        match cli.command {
            Some(Commands::Sign { file, secret }) => {
                assert_eq!(file, PathBuf::from("body.json"));
                assert_eq!(secret, "s");
            }
            _ => panic!("expected sign"),
        }
    }
}
