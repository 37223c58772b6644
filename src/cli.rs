use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use reqwest::Response;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::api::*;
use crate::client::Client;

pub mod api;
pub mod client;

const TOKEN_FILE: &str = "session_token";

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,
}
#[derive(Subcommand)]
enum Commands {
    /// Create an account; every new account starts with 500 points
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Open a session and remember its token on disk
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    Me,
    /// Wager points on rain or sun for a day 4 to 31 days ahead
    Stake {
        #[arg(short, long)]
        city: Option<String>,
        #[arg(short, long)]
        date: NaiveDate,
        #[arg(short, long)]
        time: Option<String>,
        #[arg(short, long)]
        side: Side,
        #[arg(short, long)]
        amount: Decimal,
    },
    /// Spend one bolt to raise the odds of a stake
    Boost {
        #[arg(short, long)]
        stake: StakeId,
    },
    MyBets,
    Listings {
        #[arg(short, long)]
        city: Option<String>,
        #[arg(short, long)]
        side: Option<Side>,
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Offer one of your stakes for sale; the price floor is the staked
    /// amount
    Sell {
        #[arg(short, long)]
        stake: StakeId,
        #[arg(short, long)]
        price: Option<Decimal>,
    },
    Buy {
        #[arg(short, long)]
        listing: ListingId,
    },
    Cancel {
        #[arg(short, long)]
        listing: ListingId,
    },
    /// Admin only: credit or debit points and bolts, signed amounts
    Adjust {
        #[arg(short, long)]
        user: UserId,
        #[arg(short, long)]
        points: Option<Decimal>,
        #[arg(short, long)]
        bolts: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let client = Client::new(cli.url);

    match cli.command {
        Commands::Register { username, password } => {
            let response = client
                .register(RegisterRequest {
                    username: username.clone(),
                    password,
                })
                .await;
            if response.status().is_success() {
                let created = response.json::<RegisterResponse>().await?;
                println!("Registered {} as user {}", username, created.user_id);
            } else {
                println!("{}: {}", response.status(), response.text().await?);
            }
        }
        Commands::Login { username, password } => {
            let login = client
                .login(LoginRequest {
                    username: username.clone(),
                    password,
                })
                .await?;
            let mut file = File::create(TOKEN_FILE).await?;
            file.write_all(login.token.as_bytes()).await?;
            println!("Logged in as {}", username);
        }
        Commands::Me => {
            let me = client.me(&read_token().await?).await?;
            println!("{}", serde_json::to_string_pretty(&me)?);
        }
        Commands::Stake {
            city,
            date,
            time,
            side,
            amount,
        } => {
            let request = PlaceStakeRequest {
                city,
                target_date: date,
                target_time: time,
                side,
                amount,
            };
            let response = client.place_stake(request, &read_token().await?).await;
            show::<StakeView>(response).await?;
        }
        Commands::Boost { stake } => {
            let response = client.boost_stake(stake, &read_token().await?).await;
            show::<BoostResponse>(response).await?;
        }
        Commands::MyBets => {
            let bets = client.my_bets(&read_token().await?).await?;
            println!("{}", serde_json::to_string_pretty(&bets)?);
        }
        Commands::Listings { city, side, date } => {
            let query = ListingsQuery { city, side, date };
            // the listings page works logged out as well
            let token = read_token().await.ok();
            let listings = client.listings(query, token.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&listings)?);
        }
        Commands::Sell { stake, price } => {
            let request = CreateListingRequest {
                stake_id: stake,
                ask_price: price,
            };
            let response = client.create_listing(request, &read_token().await?).await;
            show::<ListingView>(response).await?;
        }
        Commands::Buy { listing } => {
            let response = client.buy_listing(listing, &read_token().await?).await;
            show::<BuyResponse>(response).await?;
        }
        Commands::Cancel { listing } => {
            let response = client.cancel_listing(listing, &read_token().await?).await;
            if response.status().is_success() {
                println!("Listing {} cancelled", listing);
            } else {
                println!("{}: {}", response.status(), response.text().await?);
            }
        }
        Commands::Adjust {
            user,
            points,
            bolts,
        } => {
            let request = AdjustRequest {
                user_id: user,
                points,
                bolts,
            };
            let response = client.adjust(request, &read_token().await?).await;
            show::<MeResponse>(response).await?;
        }
    }
    Ok(())
}

async fn show<T: DeserializeOwned + Serialize>(response: Response) -> Result<()> {
    if response.status().is_success() {
        let body = response.json::<T>().await?;
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}: {}", response.status(), response.text().await?);
    }
    Ok(())
}
async fn read_token() -> Result<String> {
    let mut file = File::open(TOKEN_FILE).await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(String::from_utf8(contents)?.trim().to_string())
}
