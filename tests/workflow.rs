use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use ndarray::arr1;
use predicates::prelude::*;

use imagesim::{
    evaluate, AppError, Classification, Config, Credentials, Database, EmbeddingProvider,
    ImageUpload, NewComparison, Orchestrator, Session,
};

fn encode(img: RgbImage, format: ImageOutputFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn stripes_png() -> Vec<u8> {
    encode(
        RgbImage::from_fn(64, 48, |x, _| {
            if x % 16 < 8 {
                image::Rgb([220, 30, 30])
            } else {
                image::Rgb([20, 20, 200])
            }
        }),
        ImageOutputFormat::Png,
    )
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        database_path: dir.child("data").child("imagesim.db").path().to_path_buf(),
        bcrypt_cost: 4,
        ..Config::default()
    }
}

fn orchestrator(config: &Config) -> Orchestrator {
    let db = Database::open(&config.database_path).unwrap();
    let embedder = Arc::new(EmbeddingProvider::new(
        config.embedding_weights.clone(),
        Duration::from_secs(30),
    ));
    Orchestrator::new(&db, embedder, config).unwrap()
}

#[tokio::test]
#[cfg_attr(feature = "embeddings", ignore = "needs resnet50.ot weights")]
async fn test_alice_scenario() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let orch = orchestrator(&config);
    let mut session = Session::new();

    orch.register(&Credentials::new("alice", "secret123"))
        .await
        .unwrap();

    let err = orch
        .login(&mut session, &Credentials::new("alice", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));
    assert!(!session.is_authenticated());

    orch.login(&mut session, &Credentials::new("alice", "secret123"))
        .await
        .unwrap();
    assert_eq!(session.username(), Some("alice"));

    let image = stripes_png();
    let outcome = orch
        .compare_and_record(
            &mut session,
            ImageUpload::new("left.png", image.clone()),
            ImageUpload::new("right.png", image.clone()),
        )
        .await
        .unwrap();

    assert!((outcome.score - 1.0).abs() < 1e-6);
    assert_eq!(outcome.label, Classification::Similar);

    let history = orch.history(&session).await.unwrap();
    assert_eq!(history.len(), 1);
    let expected = NewComparison {
        image1: ImageUpload::new("left.png", image.clone()),
        image2: ImageUpload::new("right.png", image),
        similarity: outcome.score,
        classification: Classification::Similar,
    };
    assert!(history[0].matches(&expected));

    dir.child("data")
        .child("imagesim.db")
        .assert(predicate::path::exists());
}

#[tokio::test]
#[cfg_attr(feature = "embeddings", ignore = "needs resnet50.ot weights")]
async fn test_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let creds = Credentials::new("bob", "hunter2");

    {
        let orch = orchestrator(&config);
        orch.register(&creds).await.unwrap();
        let mut session = Session::new();
        orch.login(&mut session, &creds).await.unwrap();
        let image = stripes_png();
        orch.compare_and_record(
            &mut session,
            ImageUpload::new("a.png", image.clone()),
            ImageUpload::new("b.png", image),
        )
        .await
        .unwrap();
    }

    let orch = orchestrator(&config);
    assert!(matches!(
        orch.register(&creds).await,
        Err(AppError::UsernameTaken)
    ));
    let mut session = Session::new();
    orch.login(&mut session, &creds).await.unwrap();
    assert_eq!(orch.history(&session).await.unwrap().len(), 1);
}

#[tokio::test]
#[cfg_attr(feature = "embeddings", ignore = "needs resnet50.ot weights")]
async fn test_jpeg_and_png_uploads_compare() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let orch = orchestrator(&config);
    let creds = Credentials::new("carol", "pw");
    orch.register(&creds).await.unwrap();
    let mut session = Session::new();
    orch.login(&mut session, &creds).await.unwrap();

    let gradient = RgbImage::from_fn(40, 40, |x, y| {
        image::Rgb([(x * 6) as u8, (y * 6) as u8, 90])
    });
    let outcome = orch
        .compare_and_record(
            &mut session,
            ImageUpload::new("g.png", encode(gradient.clone(), ImageOutputFormat::Png)),
            ImageUpload::new("g.jpg", encode(gradient, ImageOutputFormat::Jpeg(95))),
        )
        .await
        .unwrap();

    assert!((-1.0..=1.0).contains(&outcome.score));
    assert_eq!(
        outcome.label,
        Classification::from_score(outcome.score, orch.threshold())
    );
}

#[tokio::test]
async fn test_concurrent_registration_admits_one() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let orch = Arc::new(orchestrator(&config));

    let mut handles = Vec::new();
    for i in 0..8 {
        let orch = Arc::clone(&orch);
        handles.push(tokio::spawn(async move {
            orch.register(&Credentials::new("dave", format!("pw{}", i)))
                .await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert!(matches!(e, AppError::UsernameTaken)),
        }
    }
    assert_eq!(ok, 1);
}

#[test]
fn test_orthogonal_embeddings_scenario() {
    let a = arr1(&[1.0f32, 0.0]);
    let b = arr1(&[0.0f32, 1.0]);
    let threshold = Config::default().similarity_threshold;

    let eval = evaluate(&a, &b, threshold).unwrap();
    assert_eq!(eval.score, 0.0);
    assert_eq!(eval.label, Classification::NotSimilar);
}

#[test]
fn test_open_fails_when_path_is_a_directory() {
    let dir = TempDir::new().unwrap();
    assert!(Database::open(dir.path()).is_err());
}
