use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_etiquetas_table::Migration),
            Box::new(m20240601_000002_create_posicoes_table::Migration),
            Box::new(m20240615_000003_unique_live_volume_numbers::Migration),
        ]
    }
}

mod m20240601_000001_create_etiquetas_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_etiquetas_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Etiquetas::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Etiquetas::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Etiquetas::Codigo).string().not_null())
                        .col(
                            ColumnDef::new(Etiquetas::Tipo)
                                .string()
                                .not_null()
                                .default("volume"),
                        )
                        .col(ColumnDef::new(Etiquetas::NotaFiscalId).string().not_null())
                        .col(ColumnDef::new(Etiquetas::NumeroNf).string().null())
                        .col(ColumnDef::new(Etiquetas::ChaveNf).string().null())
                        .col(
                            ColumnDef::new(Etiquetas::Status)
                                .string()
                                .not_null()
                                .default("gerada"),
                        )
                        .col(
                            ColumnDef::new(Etiquetas::TipoVolume)
                                .string()
                                .not_null()
                                .default("geral"),
                        )
                        .col(ColumnDef::new(Etiquetas::Area).string().null())
                        .col(ColumnDef::new(Etiquetas::Descricao).string().null())
                        .col(
                            ColumnDef::new(Etiquetas::Quantidade)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(ColumnDef::new(Etiquetas::VolumeNumero).integer().not_null())
                        .col(ColumnDef::new(Etiquetas::TotalVolumes).integer().not_null())
                        .col(ColumnDef::new(Etiquetas::AlturaCm).double().null())
                        .col(ColumnDef::new(Etiquetas::LarguraCm).double().null())
                        .col(ColumnDef::new(Etiquetas::ComprimentoCm).double().null())
                        .col(ColumnDef::new(Etiquetas::PesoTotalBruto).double().null())
                        .col(ColumnDef::new(Etiquetas::CodigoOnu).string().null())
                        .col(ColumnDef::new(Etiquetas::CodigoRisco).string().null())
                        .col(
                            ColumnDef::new(Etiquetas::ClassificacaoQuimica)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(Etiquetas::EtiquetaMaeId).string().null())
                        .col(ColumnDef::new(Etiquetas::Posicao).string().null())
                        .col(
                            ColumnDef::new(Etiquetas::DataGeracao)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Etiquetas::DataImpressao)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Etiquetas::DataInutilizacao)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Etiquetas::MotivoInutilizacao)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Etiquetas::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_etiquetas_nota_fiscal_id")
                        .table(Etiquetas::Table)
                        .col(Etiquetas::NotaFiscalId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_etiquetas_status")
                        .table(Etiquetas::Table)
                        .col(Etiquetas::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_etiquetas_codigo")
                        .table(Etiquetas::Table)
                        .col(Etiquetas::Codigo)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Etiquetas::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Etiquetas {
        Table,
        Id,
        Codigo,
        Tipo,
        NotaFiscalId,
        NumeroNf,
        ChaveNf,
        Status,
        TipoVolume,
        Area,
        Descricao,
        Quantidade,
        VolumeNumero,
        TotalVolumes,
        AlturaCm,
        LarguraCm,
        ComprimentoCm,
        PesoTotalBruto,
        CodigoOnu,
        CodigoRisco,
        ClassificacaoQuimica,
        EtiquetaMaeId,
        Posicao,
        DataGeracao,
        DataImpressao,
        DataInutilizacao,
        MotivoInutilizacao,
        UpdatedAt,
    }
}

mod m20240601_000002_create_posicoes_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_posicoes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Posicoes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Posicoes::Posicao)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Posicoes::Area).string().null())
                        .col(
                            ColumnDef::new(Posicoes::Ocupada)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Posicoes::VolumeId).string().null())
                        .col(ColumnDef::new(Posicoes::CarregamentoId).string().null())
                        .col(
                            ColumnDef::new(Posicoes::ClasseCapacidade)
                                .string()
                                .not_null()
                                .default("padrao"),
                        )
                        .col(
                            ColumnDef::new(Posicoes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Posicoes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_posicoes_area")
                        .table(Posicoes::Table)
                        .col(Posicoes::Area)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_posicoes_volume_id")
                        .table(Posicoes::Table)
                        .col(Posicoes::VolumeId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Posicoes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Posicoes {
        Table,
        Posicao,
        Area,
        Ocupada,
        VolumeId,
        CarregamentoId,
        ClasseCapacidade,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240615_000003_unique_live_volume_numbers {

    use sea_orm_migration::prelude::*;
    use sea_orm_migration::sea_orm::ConnectionTrait;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240615_000003_unique_live_volume_numbers"
        }
    }

    // Partial index: invalidated labels and mother labels may share numbers.
    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_etiquetas_live_volume_numero \
                     ON etiquetas (nota_fiscal_id, volume_numero) \
                     WHERE tipo = 'volume' AND status <> 'inutilizada'",
                )
                .await?;
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .get_connection()
                .execute_unprepared("DROP INDEX IF EXISTS uq_etiquetas_live_volume_numero")
                .await?;
            Ok(())
        }
    }
}

/// Runs every pending migration against `db_url`.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
