pub mod at4px;
