#[tokio::test]
async fn test_s3_object_store() {
    use ariel_store::object_store::s3::S3Store;
    use aws_sdk_s3::Client;

    // Set this in your environment for the test
    let Ok(bucket) = std::env::var("TEST_S3_BUCKET") else {
        eprintln!("TEST_S3_BUCKET not set, skipping");
        return;
    };
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = Client::new(&config);
    let store = S3Store::new(bucket, client);

    // Use a unique prefix for isolation
    let prefix = format!("test/{}/", uuid::Uuid::new_v4());
    ariel_store::object_store::test_helpers::tests::run_object_store_tests(&store, &prefix).await;
}
