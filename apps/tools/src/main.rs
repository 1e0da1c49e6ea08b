use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shared::domain::{MessageId, RoomId, UserId};
use storage::{Storage, StoredMessage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/moodchat.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Prints a room's history as a client would fetch it.
    History {
        room: String,
        #[arg(long, default_value_t = 0)]
        since_id: i64,
        #[arg(long)]
        for_user: Option<i64>,
    },
    Undelivered {
        user_id: i64,
    },
    PrivateRoom {
        user_a: i64,
        user_b: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username, avatar } => {
            let user_id = storage.create_user(&username, avatar.as_deref()).await?;
            println!("created user_id={}", user_id.0);
        }
        Command::History {
            room,
            since_id,
            for_user,
        } => {
            let Some(room_id) = RoomId::parse(&room) else {
                bail!("invalid room id: {room}");
            };
            let messages = storage
                .list_room_messages(
                    room_id,
                    MessageId(since_id),
                    for_user.map(UserId),
                    Utc::now(),
                )
                .await?;
            for message in &messages {
                print_message(message);
            }
        }
        Command::Undelivered { user_id } => {
            let messages = storage.undelivered_for(UserId(user_id), Utc::now()).await?;
            println!("{} undelivered for user_id={user_id}", messages.len());
            for message in &messages {
                print_message(message);
            }
        }
        Command::PrivateRoom { user_a, user_b } => {
            if user_a == user_b {
                bail!("a private room needs two different users");
            }
            let room = storage
                .get_or_create_private_room(UserId(user_a), UserId(user_b), Utc::now())
                .await?;
            println!("room_id={}", RoomId::from(room.id));
        }
    }

    Ok(())
}

fn print_message(message: &StoredMessage) {
    let target = message
        .target_user_id
        .map(|id| format!(" -> {}", id.0))
        .unwrap_or_default();
    println!(
        "#{} [{}] {} {}{target}: {}",
        message.id.0, message.room_id, message.time, message.author, message.text
    );
}
