/**
 * SHIELD SIMULATOR - Synthetic incident feed for the dashboard
 *
 * Every `--interval` seconds picks a template incident, jitters its
 * coordinates by up to 0.01 degree and publishes it as an INSERT change on
 * `{prefix}/incidents/changes@v1`, followed by a log line on
 * `{prefix}/logs/changes@v1`. Coordinates go out as strings, like the
 * backend stores them.
 *
 * Publishes only; bulk queries are not answered here.
 */

use anyhow::Result;
use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::{json, Value};
use shield_sync::models::RawRecord;
use shield_sync::mqtt::changes_topic;
use shield_sync::ChangeEvent;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "shield-simulator", about = "Publishes simulated incidents on the event bus")]
struct Args {
    /// Seconds between two incidents
    #[arg(long, default_value_t = 30)]
    interval: u64,
    /// Stop after this many incidents (runs until Ctrl+C otherwise)
    #[arg(long)]
    count: Option<u64>,
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 1883)]
    port: u16,
    #[arg(long, default_value = "shield")]
    prefix: String,
}

struct Template {
    kind: &'static str,
    location: &'static str,
    lat: f64,
    lng: f64,
    severity: &'static str,
    summaries: &'static [&'static str],
}

const TEMPLATES: &[Template] = &[
    Template {
        kind: "Theft",
        location: "Westlands Mall",
        lat: -1.2674,
        lng: 36.8075,
        severity: "Medium",
        summaries: &["Phone stolen at food court", "Shoplifting at electronics store", "Wallet pickpocketed", "Bag snatching attempt"],
    },
    Template {
        kind: "Robbery",
        location: "CBD, Moi Avenue",
        lat: -1.2834,
        lng: 36.8235,
        severity: "High",
        summaries: &["Armed robbery at M-Pesa agent", "Mugging near bus station", "Violent robbery at jewelry store"],
    },
    Template {
        kind: "Carjacking",
        location: "Thika Road",
        lat: -1.2500,
        lng: 36.8900,
        severity: "Critical",
        summaries: &["Vehicle hijacking at traffic lights", "Armed carjacking near Roysambu", "SUV stolen at gunpoint"],
    },
    Template {
        kind: "Assault",
        location: "Kibera",
        lat: -1.3133,
        lng: 36.7828,
        severity: "High",
        summaries: &["Physical altercation reported", "Gang violence incident", "Domestic dispute turned violent"],
    },
    Template {
        kind: "Theft",
        location: "Eastleigh",
        lat: -1.2833,
        lng: 36.8500,
        severity: "Medium",
        summaries: &["Motorcycle theft", "Shop break-in overnight", "Mobile phone snatched"],
    },
    Template {
        kind: "Burglary",
        location: "Karen",
        lat: -1.3197,
        lng: 36.7078,
        severity: "High",
        summaries: &["Home invasion reported", "Residential break-in", "Burglary at gated community"],
    },
];

const JITTER_DEG: f64 = 0.01;

/// Random draws taken from the bits of a v4 uuid (122 random bits per roll).
struct Dice {
    bits: u128,
}

impl Dice {
    fn roll() -> Self {
        Self { bits: Uuid::new_v4().as_u128() }
    }

    fn take(&mut self, width: u32) -> u64 {
        let value = (self.bits & ((1u128 << width) - 1)) as u64;
        self.bits >>= width;
        value
    }

    /// Index in 0..n
    fn pick(&mut self, n: usize) -> usize {
        (self.take(16) as usize) % n.max(1)
    }

    /// Uniform in [0, 1)
    fn unit(&mut self) -> f64 {
        self.take(24) as f64 / (1u64 << 24) as f64
    }

    /// Uniform in [-spread, spread)
    fn jitter(&mut self, spread: f64) -> f64 {
        (self.unit() * 2.0 - 1.0) * spread
    }
}

fn simulated_incident(dice: &mut Dice, created_at: &str) -> RawRecord {
    let template = &TEMPLATES[dice.pick(TEMPLATES.len())];
    let summary = template.summaries[dice.pick(template.summaries.len())];
    let lat = template.lat + dice.jitter(JITTER_DEG);
    let lng = template.lng + dice.jitter(JITTER_DEG);
    let bias_score = (dice.unit() * 0.3 * 100.0).round() / 100.0;

    as_record(json!({
        "id": Uuid::new_v4().to_string(),
        "type": template.kind,
        "summary": summary,
        "location": template.location,
        "lat": lat.to_string(),
        "lng": lng.to_string(),
        "severity": template.severity,
        "source": "Simulator",
        "status": "Active",
        "bias_score": bias_score,
        "created_at": created_at,
    }))
}

fn simulated_log(incident: &RawRecord, created_at: &str) -> RawRecord {
    let field = |key: &str| incident.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    as_record(json!({
        "id": Uuid::new_v4().to_string(),
        "message": format!("Simulated: {} at {}", field("type"), field("location")),
        "created_at": created_at,
    }))
}

fn as_record(value: Value) -> RawRecord {
    match value {
        Value::Object(map) => map,
        _ => RawRecord::new(),
    }
}

async fn publish_insert(client: &AsyncClient, topic: &str, row: RawRecord) -> Result<()> {
    let payload = serde_json::to_vec(&ChangeEvent::Insert { new: row })?;
    client.publish(topic, QoS::AtLeastOnce, false, payload).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let client_id = format!("shield-simulator-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let mut opts = MqttOptions::new(client_id, &args.host, args.port);
    opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!("[sim] MQTT loop error: {:?}", e);
                sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let incidents_topic = changes_topic(&args.prefix, "incidents");
    let logs_topic = changes_topic(&args.prefix, "logs");
    info!(
        "[sim] publishing on {} every {}s ({}:{})",
        incidents_topic, args.interval, args.host, args.port
    );

    let mut published = 0u64;
    loop {
        let created_at = OffsetDateTime::now_utc().format(&Rfc3339)?;
        let incident = simulated_incident(&mut Dice::roll(), &created_at);
        let log = simulated_log(&incident, &created_at);

        match publish_insert(&client, &incidents_topic, incident.clone()).await {
            Ok(()) => {
                published += 1;
                info!(
                    "[sim] incident #{}: {} at {} ({})",
                    published,
                    incident.get("type").and_then(serde_json::Value::as_str).unwrap_or_default(),
                    incident.get("location").and_then(serde_json::Value::as_str).unwrap_or_default(),
                    incident.get("severity").and_then(serde_json::Value::as_str).unwrap_or_default(),
                );
                if let Err(e) = publish_insert(&client, &logs_topic, log).await {
                    error!("[sim] log publish failed: {}", e);
                }
            }
            Err(e) => error!("[sim] incident publish failed: {}", e),
        }

        if args.count.is_some_and(|count| published >= count) {
            break;
        }

        tokio::select! {
            _ = sleep(Duration::from_secs(args.interval.max(1))) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("[sim] stopped by user");
                break;
            }
        }
    }

    // let the event loop flush the last publishes
    sleep(Duration::from_millis(500)).await;
    client.disconnect().await.ok();
    info!("[sim] done, {} incident(s) published", published);
    Ok(())
}
