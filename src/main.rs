use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use courseforum::config::Config;
use courseforum::forum::types::{NewPost, TopicFilters};
use courseforum::forum::ForumQueries;
use courseforum::logging;
use courseforum::query::QueryResult;

#[derive(Parser, Debug)]
#[command(name = "courseforum")]
#[command(about = "Browse course platform forums from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/courseforum/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API root, used instead of the config file's api.base_url
  #[arg(long)]
  base_url: Option<String>,

  /// Write logs to a daily rolling file in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List forum categories and site stats
  Forums,
  /// Show one forum
  Forum { slug: String },
  /// List a forum's topics, or search all topics
  Topics {
    slug: Option<String>,
    #[arg(long)]
    search: Option<String>,
    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: usize,
  },
  /// Show one topic
  Topic { id: String },
  /// List a topic's posts
  Posts {
    topic_id: String,
    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: usize,
  },
  /// Reply to a topic
  Reply { topic_id: String, content: String },
}

fn load_config(args: &Args) -> Result<Config> {
  Config::load_with_base_url(args.config.as_deref(), args.base_url.clone())
}

/// Unwrap a query result for printing, turning a stored error into a report.
fn into_data<T>(result: QueryResult<T>) -> Result<std::sync::Arc<T>> {
  if let Some(err) = result.error {
    return Err(eyre!(err));
  }
  result.data.ok_or_else(|| eyre!("No data returned"))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_dir.as_deref())?;

  let config = load_config(&args)?;
  let forum = ForumQueries::from_config(&config)?;

  match args.command {
    Command::Forums => {
      let index = into_data(forum.forums().await)?;
      for category in &index.categories {
        println!("{}", category.name);
        for f in &category.forums {
          println!(
            "  {:<24} {:>6} topics {:>7} posts",
            f.slug, f.topic_count, f.post_count
          );
        }
      }
      println!(
        "\n{} topics, {} posts, {} users ({} online)",
        index.stats.total_topics,
        index.stats.total_posts,
        index.stats.total_users,
        index.stats.online_users
      );
    }
    Command::Forum { slug } => {
      let detail = into_data(forum.forum_detail(Some(&slug)).await)?;
      println!("{} ({})", detail.forum.name, detail.forum.slug);
      if let Some(description) = &detail.forum.description {
        println!("{}", description);
      }
      if !detail.moderators.is_empty() {
        let names: Vec<&str> = detail.moderators.iter().map(|m| m.name()).collect();
        println!("Moderators: {}", names.join(", "));
      }
    }
    Command::Topics {
      slug,
      search,
      pages,
    } => {
      let query = match (slug, search) {
        (Some(slug), None) => forum.forum_topics(Some(&slug)),
        (slug, search) => forum.topics(TopicFilters {
          forum: slug,
          search,
          ordering: None,
        }),
      };

      let mut result = query.fetch().await;
      while result.has_next_page && result.data().map_or(0, |d| d.pages().len()) < pages {
        result = query.fetch_next_page().await;
      }
      if let Some(err) = result.error() {
        return Err(eyre!(err.clone()));
      }

      for topic in result.items() {
        let flags = match (topic.is_pinned, topic.is_locked) {
          (true, true) => "[pinned, locked] ",
          (true, false) => "[pinned] ",
          (false, true) => "[locked] ",
          (false, false) => "",
        };
        println!("{:>8}  {}{} ({} posts)", topic.id, flags, topic.title, topic.post_count);
      }
      if result.has_next_page {
        println!("... more topics available");
      }
    }
    Command::Topic { id } => {
      let topic = into_data(forum.topic_detail(Some(&id)).await)?;
      println!("{}", topic.title);
      if let Some(author) = &topic.author {
        println!("by {}", author.name());
      }
      println!("{} posts, {} views", topic.post_count, topic.view_count);
    }
    Command::Posts { topic_id, pages } => {
      let query = forum.topic_posts(Some(&topic_id));
      let mut result = query.fetch().await;
      while result.has_next_page && result.data().map_or(0, |d| d.pages().len()) < pages {
        result = query.fetch_next_page().await;
      }
      if let Some(err) = result.error() {
        return Err(eyre!(err.clone()));
      }

      for post in result.items() {
        let author = post.author.as_ref().map(|a| a.name()).unwrap_or("?");
        let when = post
          .created_at
          .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
          .unwrap_or_default();
        println!("#{} {} {}\n{}\n", post.id, author, when, post.content);
      }
      if result.has_next_page {
        println!("... more posts available (use --pages)");
      }
    }
    Command::Reply { topic_id, content } => {
      let post = forum.create_post(&topic_id, NewPost::new(content)).await?;
      println!("Created post #{}", post.id);
    }
  }

  Ok(())
}
