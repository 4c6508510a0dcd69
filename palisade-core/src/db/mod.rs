use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use tracing::info;
use uuid::Uuid;
use palisade_common::PalisadeConfig;
use palisade_db_entities::{AsnRecord, GeoBlockedCountry, Parameters};
use palisade_db_migrations::migrate_database;

/// Well-known cloud and VPN operator networks, seeded at startup so the
/// ASN heuristic works before any provider has been consulted.
/// `(asn, org, is_hosting, is_vpn)`.
const SEED_ASNS: &[(i64, &str, bool, bool)] = &[
    (16509, "Amazon.com, Inc.", true, false),
    (14618, "Amazon.com, Inc.", true, false),
    (15169, "Google LLC", true, false),
    (396982, "Google Cloud Platform", true, false),
    (8075, "Microsoft Corporation", true, false),
    (13335, "Cloudflare, Inc.", true, false),
    (20940, "Akamai International B.V.", true, false),
    (16276, "OVH SAS", true, false),
    (24940, "Hetzner Online GmbH", true, false),
    (14061, "DigitalOcean, LLC", true, false),
    (63949, "Akamai Connected Cloud (Linode)", true, false),
    (20473, "The Constant Company, LLC (Vultr)", true, false),
    (45102, "Alibaba (US) Technology Co., Ltd.", true, false),
    (9009, "M247 Europe SRL", true, true),
    (60068, "Datacamp Limited", true, true),
    (136787, "TEFINCOM S.A.", false, true),
];

/// How long seeded ASN rows stay valid before the sweep may drop them.
const SEED_ASN_TTL_DAYS: i64 = 365;

pub async fn connect_to_db(config: &PalisadeConfig) -> Result<DatabaseConnection> {
    let mut url = url::Url::parse(&config.database_url.expose_secret()[..])?;
    if url.scheme() == "sqlite" {
        url.set_query(Some("mode=rwc"));
    }

    let mut opt = ConnectOptions::new(url.to_string());
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let connection = Database::connect(opt).await?;

    migrate_database(&connection).await?;
    Ok(connection)
}

/// Seeds the parameters row and the well-known ASN table. Idempotent.
pub async fn populate_db(db: &DatabaseConnection, config: &PalisadeConfig) -> Result<()> {
    let parameters = Parameters::Entity::get(db).await?;

    if config.geo.enabled && !parameters.geo_blocking_enabled {
        Parameters::ActiveModel {
            id: Set(parameters.id),
            geo_blocking_enabled: Set(true),
        }
        .update(db)
        .await?;
        info!("Geo-blocking enabled from config defaults");
    }

    if !config.geo.blocked_countries.is_empty()
        && GeoBlockedCountry::Entity::find().one(db).await?.is_none()
    {
        for code in &config.geo.blocked_countries {
            GeoBlockedCountry::ActiveModel {
                id: Set(Uuid::new_v4()),
                country_code: Set(code.to_ascii_uppercase()),
                name: Set(None),
                added_at: Set(Utc::now()),
            }
            .insert(db)
            .await?;
        }
        info!(
            count = config.geo.blocked_countries.len(),
            "Seeded geo-blocklist from config defaults"
        );
    }

    let now = Utc::now();
    let mut seeded = 0;
    for (asn, org, is_hosting, is_vpn) in SEED_ASNS {
        let existing = AsnRecord::Entity::find()
            .filter(AsnRecord::Column::Asn.eq(*asn))
            .filter(AsnRecord::Column::ExpiresAt.gt(now))
            .one(db)
            .await?;
        if existing.is_some() {
            continue;
        }
        AsnRecord::Entity::delete_many()
            .filter(AsnRecord::Column::Asn.eq(*asn))
            .exec(db)
            .await?;
        AsnRecord::ActiveModel {
            id: Set(Uuid::new_v4()),
            asn: Set(*asn),
            org_name: Set((*org).to_owned()),
            is_hosting: Set(*is_hosting),
            is_vpn: Set(*is_vpn),
            country: Set(None),
            expires_at: Set(now + chrono::Duration::days(SEED_ASN_TTL_DAYS)),
        }
        .insert(db)
        .await?;
        seeded += 1;
    }
    if seeded > 0 {
        info!(count = seeded, "Seeded well-known ASN records");
    }

    Ok(())
}
