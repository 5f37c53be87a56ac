pub mod etiqueta;
pub mod posicao;
