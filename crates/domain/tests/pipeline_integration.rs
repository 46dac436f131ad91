//! Integration tests for registration, aggregation and processing.

use chrono::NaiveDate;
use common::{AnimalStatus, Money, Species};
use domain::{
    AggregateAnimals, DomainError, IntakeLine, PipelineError, PipelineService, RegisterAnimal,
    RegisterFarmer, StartProcessing,
};
use store::{Animal, AnimalFilter, Farmer, InMemoryStore};

fn create_service() -> PipelineService<InMemoryStore> {
    PipelineService::new(InMemoryStore::new(), "KES")
}

fn received_on() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()
}

async fn farmer(service: &PipelineService<InMemoryStore>) -> Farmer {
    service
        .register_farmer(RegisterFarmer {
            name: "Wanjiru Kamau".to_string(),
            phone: "+254700000001".to_string(),
            county: "Nakuru".to_string(),
            ward: "Njoro".to_string(),
            village: Some(" Mau ".to_string()),
        })
        .await
        .unwrap()
}

async fn animal(service: &PipelineService<InMemoryStore>, farmer: &Farmer, species: Species) -> Animal {
    service
        .register_animal(RegisterAnimal {
            species,
            farmer_id: farmer.id,
            sex: Some("F".to_string()),
            breed: None,
            estimated_dob: None,
        })
        .await
        .unwrap()
}

fn aggregate_cmd(species: Species, animals: &[&Animal]) -> AggregateAnimals {
    AggregateAnimals {
        species,
        site_name: "Nakuru".to_string(),
        received_on: received_on(),
        lines: animals
            .iter()
            .map(|a| IntakeLine::new(a.id).weighed(32.5).priced(Money::from_major(9_000)))
            .collect(),
        created_by: None,
    }
}

fn processing_cmd(species: Species, animals: &[&Animal]) -> StartProcessing {
    StartProcessing {
        species,
        facility: "Athi River Abattoir".to_string(),
        slaughter_date: Some(received_on()),
        halal_cert_ref: Some("HAL-2025-11".to_string()),
        animal_ids: animals.iter().map(|a| a.id).collect(),
        created_by: None,
    }
}

mod registration {
    use super::*;

    #[tokio::test]
    async fn animal_starts_on_farm_with_sequential_codes() {
        let service = create_service();
        let farmer = farmer(&service).await;
        assert_eq!(farmer.village.as_deref(), Some("Mau"));

        let first = animal(&service, &farmer, Species::Goat).await;
        let second = animal(&service, &farmer, Species::Goat).await;
        let cow = animal(&service, &farmer, Species::Cattle).await;

        assert_eq!(first.status, AnimalStatus::OnFarm);
        assert!(first.code.starts_with("RZ-GOAT-"));
        assert!(first.code.ends_with(&format!("-{}-001", farmer.id)));
        assert!(second.code.ends_with(&format!("-{}-002", farmer.id)));
        assert!(cow.code.ends_with(&format!("-{}-001", farmer.id)));
    }

    #[tokio::test]
    async fn unknown_farmer_is_rejected() {
        let service = create_service();
        let err = service
            .register_animal(RegisterAnimal {
                species: Species::Sheep,
                farmer_id: common::FarmerId::new(404),
                sex: None,
                breed: None,
                estimated_dob: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Pipeline(PipelineError::FarmerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn blank_farmer_fields_are_rejected() {
        let service = create_service();
        let err = service
            .register_farmer(RegisterFarmer {
                name: "  ".to_string(),
                phone: "+254700000001".to_string(),
                county: "Nakuru".to_string(),
                ward: "Njoro".to_string(),
                village: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Pipeline(PipelineError::MissingField("Farmer name"))
        ));
    }
}

mod aggregation {
    use super::*;

    #[tokio::test]
    async fn aggregated_animal_is_linked_to_batch() {
        let service = create_service();
        let farmer = farmer(&service).await;
        let a1 = animal(&service, &farmer, Species::Goat).await;

        let outcome = service
            .aggregate(aggregate_cmd(Species::Goat, &[&a1]))
            .await
            .unwrap();
        assert_eq!(outcome.batch.site_name, "Nakuru");
        assert_eq!(outcome.attached, vec![a1.id]);

        let a1 = service.get_animal(a1.id).await.unwrap();
        assert_eq!(a1.status, AnimalStatus::Aggregated);
        assert_eq!(a1.aggregation_batch_id, Some(outcome.batch.id));
        assert_eq!(a1.live_weight_kg, Some(32.5));
        assert_eq!(a1.weight_method.as_deref(), Some("scale"));
        assert_eq!(a1.purchase_currency.as_deref(), Some("KES"));

        let view = service.aggregation_batch(outcome.batch.id).await.unwrap();
        assert_eq!(view.animals.len(), 1);
    }

    #[tokio::test]
    async fn ineligible_animals_are_skipped() {
        let service = create_service();
        let farmer = farmer(&service).await;
        let goat = animal(&service, &farmer, Species::Goat).await;
        let sheep = animal(&service, &farmer, Species::Sheep).await;
        let batched = animal(&service, &farmer, Species::Goat).await;
        service
            .aggregate(aggregate_cmd(Species::Goat, &[&batched]))
            .await
            .unwrap();

        let outcome = service
            .aggregate(aggregate_cmd(Species::Goat, &[&goat, &sheep, &batched]))
            .await
            .unwrap();
        assert_eq!(outcome.attached, vec![goat.id]);
        assert_eq!(outcome.skipped.len(), 2);

        let sheep = service.get_animal(sheep.id).await.unwrap();
        assert_eq!(sheep.status, AnimalStatus::OnFarm);
        assert_eq!(sheep.aggregation_batch_id, None);
    }

    #[tokio::test]
    async fn no_batch_is_created_when_nothing_qualifies() {
        let service = create_service();
        let farmer = farmer(&service).await;
        let sheep = animal(&service, &farmer, Species::Sheep).await;

        let err = service
            .aggregate(aggregate_cmd(Species::Goat, &[&sheep]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Pipeline(PipelineError::NoQualifyingAnimals {
                stage: "aggregation",
                species: Species::Goat,
            })
        ));
        assert!(service.list_aggregation_batches(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_intake_lines_are_rejected_up_front() {
        let service = create_service();
        let farmer = farmer(&service).await;
        let goat = animal(&service, &farmer, Species::Goat).await;

        let mut cmd = aggregate_cmd(Species::Goat, &[&goat]);
        cmd.lines[0].live_weight_kg = Some(-3.0);
        let err = service.aggregate(cmd).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Pipeline(PipelineError::InvalidWeight { .. })
        ));

        let mut cmd = aggregate_cmd(Species::Goat, &[]);
        cmd.lines.clear();
        let err = service.aggregate(cmd).await.unwrap_err();
        assert!(matches!(err, DomainError::Pipeline(PipelineError::EmptySelection)));

        let goat = service.get_animal(goat.id).await.unwrap();
        assert_eq!(goat.status, AnimalStatus::OnFarm);
    }
}

mod processing {
    use super::*;

    #[tokio::test]
    async fn only_aggregated_animals_enter_processing() {
        let service = create_service();
        let farmer = farmer(&service).await;
        let aggregated = animal(&service, &farmer, Species::Goat).await;
        let on_farm = animal(&service, &farmer, Species::Goat).await;
        service
            .aggregate(aggregate_cmd(Species::Goat, &[&aggregated]))
            .await
            .unwrap();

        let outcome = service
            .start_processing(processing_cmd(Species::Goat, &[&aggregated, &on_farm]))
            .await
            .unwrap();
        assert_eq!(outcome.attached, vec![aggregated.id]);
        assert_eq!(outcome.skipped, vec![on_farm.id]);

        let processing = service
            .list_animals(AnimalFilter {
                status: Some(AnimalStatus::Processing),
                ..AnimalFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, aggregated.id);
    }

    #[tokio::test]
    async fn status_never_moves_backwards() {
        let service = create_service();
        let farmer = farmer(&service).await;
        let goat = animal(&service, &farmer, Species::Goat).await;
        service
            .aggregate(aggregate_cmd(Species::Goat, &[&goat]))
            .await
            .unwrap();
        service
            .start_processing(processing_cmd(Species::Goat, &[&goat]))
            .await
            .unwrap();

        // Neither batch operation accepts an animal that is already past it.
        assert!(service
            .aggregate(aggregate_cmd(Species::Goat, &[&goat]))
            .await
            .is_err());
        assert!(service
            .start_processing(processing_cmd(Species::Goat, &[&goat]))
            .await
            .is_err());

        let goat = service.get_animal(goat.id).await.unwrap();
        assert_eq!(goat.status, AnimalStatus::Processing);
        assert_eq!(service.list_processing_batches(None).await.unwrap().len(), 1);
    }
}
