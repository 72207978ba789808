use clap::{ArgAction, Parser, Subcommand};
use reqwest::Client;
use shard_search::models::{MissingDataStrategy, ProfileSettings};
use shard_search::profile::{parse_payload, SearchProfile};

#[derive(Parser)]
#[command(name = "shard-search-cli")]
#[command(about = "shard-search CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "SHARD_SEARCH_ENDPOINT", default_value = "http://localhost:9800")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Free-text search
    Search {
        #[arg(value_name = "INDEX")]
        index: String,

        #[arg(value_name = "QUERY")]
        query: String,

        #[arg(short, long, default_value = "10")]
        count: usize,

        /// Relative cutoff percentage
        #[arg(short = 'C', long)]
        cutoff: Option<u32>,

        /// Document id to leave out of the results
        #[arg(short = 'x', long)]
        exclude: Option<String>,

        /// Comma separated columns to return
        #[arg(short, long)]
        fields: Option<String>,
    },

    /// Search with a search profile
    #[command(name = "profile-search")]
    ProfileSearch {
        #[arg(value_name = "INDEX")]
        index: String,

        /// Payload, `key:value||key:value`
        #[arg(value_name = "VALUES")]
        values: String,

        /// Profile name, the index's first profile when omitted
        #[arg(short, long)]
        profile: Option<String>,

        #[arg(short, long)]
        count: Option<usize>,

        #[arg(short = 'C', long)]
        cutoff: Option<u32>,

        #[arg(short = 'x', long)]
        exclude: Option<String>,
    },

    /// Commit pending documents and refresh searchers
    Commit {
        #[arg(value_name = "INDEX")]
        index: String,
    },

    /// Switch bulk indexing on or off
    Bulk {
        #[arg(value_name = "INDEX")]
        index: String,

        #[arg(value_name = "ENABLE", action = ArgAction::Set)]
        enable: bool,
    },

    /// Run a connector job
    Connector {
        #[arg(value_name = "INDEX")]
        index: String,

        /// Connector name, the index default when omitted
        #[arg(short, long)]
        connector: Option<String>,

        /// Run type: bulk or single
        #[arg(short = 't', long = "type", default_value = "bulk")]
        request_type: String,

        /// Source file for file based connectors
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Show the status of a connector job
    #[command(name = "job-status")]
    JobStatus {
        #[arg(value_name = "INDEX")]
        index: String,

        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Show index statistics
    Stats {
        #[arg(value_name = "INDEX")]
        index: String,
    },

    /// Compile a match template and render it offline
    #[command(name = "render-profile")]
    RenderProfile {
        #[arg(value_name = "TEMPLATE")]
        template: String,

        /// Payload, `key:value||key:value`
        #[arg(value_name = "VALUES", default_value = "")]
        values: String,

        /// Missing data strategy: error, ignore or treat_as_null
        #[arg(short, long, default_value = "ignore")]
        missing_data: MissingDataStrategy,

        #[arg(short, long, default_value = "null")]
        null_value: String,
    },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let endpoint = cli.endpoint.trim_end_matches('/').to_string();

    let request = match cli.command {
        Commands::Search {
            index,
            query,
            count,
            cutoff,
            exclude,
            fields,
        } => {
            let mut params = vec![("q", query), ("count", count.to_string())];
            push_opt(&mut params, "cutoff", cutoff);
            push_opt(&mut params, "exclude", exclude);
            push_opt(&mut params, "fields", fields);
            client
                .get(format!("{}/{}/search", endpoint, index))
                .query(&params)
        }

        Commands::ProfileSearch {
            index,
            values,
            profile,
            count,
            cutoff,
            exclude,
        } => {
            let mut params = vec![("values", values)];
            push_opt(&mut params, "profile", profile);
            push_opt(&mut params, "count", count);
            push_opt(&mut params, "cutoff", cutoff);
            push_opt(&mut params, "exclude", exclude);
            client
                .get(format!("{}/{}/profilesearch", endpoint, index))
                .query(&params)
        }

        Commands::Commit { index } => client.post(format!("{}/{}/commit", endpoint, index)),

        Commands::Bulk { index, enable } => client
            .post(format!("{}/{}/bulk", endpoint, index))
            .query(&[("enable", enable.to_string())]),

        Commands::Connector {
            index,
            connector,
            request_type,
            path,
        } => {
            let mut params = vec![("type", request_type)];
            push_opt(&mut params, "connector", connector);
            push_opt(&mut params, "path", path);
            client
                .post(format!("{}/{}/connector", endpoint, index))
                .query(&params)
        }

        Commands::JobStatus { index, job_id } => client
            .get(format!("{}/{}/jobstatus", endpoint, index))
            .query(&[("jobid", job_id)]),

        Commands::Stats { index } => client.get(format!("{}/{}/stats", endpoint, index)),

        Commands::RenderProfile {
            template,
            values,
            missing_data,
            null_value,
        } => {
            let settings = ProfileSettings::new("cli", template).with_missing_data(missing_data);
            let profile = SearchProfile::compile(&settings, &|name: &str| Some(name.to_string()))?;
            let payload = parse_payload(&values)?;
            println!("{}", profile.render(&payload, &null_value)?);
            return Ok(());
        }

        Commands::Health => client.get(format!("{}/health", endpoint)),
    };

    let response = request.send().await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        anyhow::bail!("request failed with status {}", status);
    }
    Ok(())
}

fn push_opt<T: ToString>(params: &mut Vec<(&'static str, String)>, name: &'static str, value: Option<T>) {
    if let Some(value) = value {
        params.push((name, value.to_string()));
    }
}
