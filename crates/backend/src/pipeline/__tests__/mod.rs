mod helpers;
mod ingest;
mod shutdown;
