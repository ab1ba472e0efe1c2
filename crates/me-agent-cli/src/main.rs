use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use me_agent::chat::anonymous_user_id;
use me_agent::flow::ReviewState;
use me_agent::{AgentConfig, AgentError, AgentEvent, MeAgent, RedemptionFlow, SwapStatus};
use me_agent_wallet::LocalKeyWallet;

#[derive(Parser)]
#[command(name = "me-agent", about = "Redeem ME rewards for discount coupons")]
struct Cli {
    /// Email used for the wallet session (defaults to ME_USER_EMAIL)
    #[arg(long, global = true, env = "ME_USER_EMAIL")]
    email: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the reward balances of the wallet
    Balances,
    /// Show an offer by code
    Offer { code: String },
    /// List brands and their offers
    Brands,
    /// Price an offer in one of your rewards
    Quote {
        code: String,
        /// Contract address of the reward to spend
        #[arg(long)]
        reward: Option<String>,
        /// Product variant to redeem
        #[arg(long)]
        variant: Option<String>,
    },
    /// Redeem an offer and print the coupon
    Redeem {
        code: String,
        #[arg(long)]
        reward: Option<String>,
        #[arg(long)]
        variant: Option<String>,
        /// Also print a checkout link for this variant id on the brand's store
        #[arg(long)]
        checkout: Option<String>,
    },
    /// Send a message to the shopping agent
    Chat {
        message: String,
        /// Chat user id (random when omitted)
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    let mut config = AgentConfig::from_env()?;
    if let Some(email) = cli.email {
        config = config.with_user_email(email);
    }

    match cli.command {
        Command::Offer { code } => {
            let agent = MeAgent::init(config, None).await?;
            let offer = agent.catalog().offer_by_code(&code).await?;
            println!("{}", serde_json::to_string_pretty(&offer)?);
            agent.destroy().await;
        }
        Command::Brands => {
            let agent = MeAgent::init(config, None).await?;
            for entry in agent.catalog().brands_with_offers().await? {
                println!("{} ({})", entry.brand.name, entry.brand.id);
                for offer in entry.offers {
                    let code = offer.code.as_deref().unwrap_or("-");
                    println!("  {code:<16} {}", offer.name);
                }
            }
            agent.destroy().await;
        }
        Command::Chat { message, user } => {
            let agent = MeAgent::init(config, None).await?;
            let user = user.unwrap_or_else(anonymous_user_id);
            let session = agent.chat().create_session(&user).await?;
            agent
                .chat()
                .send_message(&session, &message, |event| match event {
                    AgentEvent::TextDelta(text) => {
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                    AgentEvent::FunctionCall { name, args } => {
                        eprintln!("\n[tool call] {name} {args}");
                    }
                    AgentEvent::FunctionResponse { name, .. } => {
                        eprintln!("[tool result] {name}");
                    }
                })
                .await?;
            println!();
            agent.destroy().await;
        }
        Command::Balances => {
            let agent = wallet_agent(config).await?;
            let service = agent.redemption();
            let email = service
                .email()
                .await
                .ok_or_else(|| AgentError::Config("pass --email or set ME_USER_EMAIL".to_string()))?;
            service.ensure_magic_login(&email).await?;
            service.login_to_me_protocol().await?;
            for b in service.fetch_balances().await? {
                println!(
                    "{:<10} {:>14.4}  {}",
                    b.reward.symbol, b.balance, b.reward.contract_address
                );
            }
            agent.destroy().await;
        }
        Command::Quote {
            code,
            reward,
            variant,
        } => {
            let agent = wallet_agent(config).await?;
            let mut flow = agent.flow();
            review(&mut flow, &code, reward.as_deref(), variant.as_deref()).await?;
            if let Some(review) = flow.review() {
                print_review(review);
            }
            agent.destroy().await;
        }
        Command::Redeem {
            code,
            reward,
            variant,
            checkout,
        } => {
            let agent = wallet_agent(config).await?;
            let mut flow = agent.flow();
            review(&mut flow, &code, reward.as_deref(), variant.as_deref()).await?;
            if let Some(review) = flow.review() {
                print_review(review);
            }

            let order = flow.handle_redemption().await?;
            println!("Order {}: coupon {}", order.id, order.coupon.code);
            if let Some(variant_on_site) = checkout {
                println!("Checkout: {}", flow.use_coupon(&variant_on_site).await?);
            }
            agent.destroy().await;
        }
    }
    Ok(())
}

async fn wallet_agent(config: AgentConfig) -> Result<MeAgent, AgentError> {
    let wallet = LocalKeyWallet::from_env()?;
    tracing::info!(wallet = %wallet.address(), "using local wallet");
    MeAgent::init(config, Some(Arc::new(wallet))).await
}

/// Load an offer and apply the requested reward/variant, repricing if either changed.
async fn review(
    flow: &mut RedemptionFlow,
    code: &str,
    reward: Option<&str>,
    variant: Option<&str>,
) -> Result<(), AgentError> {
    flow.load_offer(code, None).await?;
    if let Some(reward) = reward {
        flow.select_reward(reward)?;
    }
    if let Some(variant) = variant {
        flow.select_variant(variant)?;
    }
    if reward.is_some() || variant.is_some() {
        flow.refresh_swap().await?;
    }
    Ok(())
}

fn print_review(review: &ReviewState) {
    let reward = &review.selected_reward;
    println!("Offer:   {} ({})", review.offer.id, review.offer.brand.id);
    println!(
        "Reward:  {} balance {:.4}",
        reward.reward.symbol, reward.balance
    );
    if let Some(variant) = &review.selected_variant {
        println!("Variant: {variant}");
    }
    match &review.swap {
        SwapStatus::Ready(swap) => println!(
            "Cost:    {:.4} {} ({} route)",
            swap.amount,
            reward.reward.symbol,
            if review.is_same_brand() { "same-brand" } else { "cross-brand" }
        ),
        SwapStatus::Pending => println!("Cost:    pending"),
        SwapStatus::Failed(reason) => println!("Cost:    unavailable ({reason})"),
    }
    if let Some(message) = &review.message {
        println!("Note:    {message}");
    }
}
